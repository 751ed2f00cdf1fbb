//! Odds provider adapters and the factory that builds them from configuration.

pub mod fixture;
pub mod the_odds_api;

pub use fixture::FixtureProvider;
pub use the_odds_api::{TheOddsApiProvider, THE_ODDS_API_URL};

use anyhow::{anyhow, Context, Result};
use arbys_core::{AppConfig, OddsProvider, ProviderConfig, ProviderKind};
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// A built adapter together with the configuration it came from.
pub struct ConfiguredProvider {
    pub provider: Arc<dyn OddsProvider>,
    pub config: ProviderConfig,
}

impl std::fmt::Debug for ConfiguredProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfiguredProvider")
            .field("id", &self.config.id)
            .field("kind", &self.config.kind)
            .field("enabled", &self.config.enabled)
            .finish()
    }
}

/// Builds one adapter, reading secrets through `env`.
///
/// # Errors
///
/// Fails if a required API key or fixture path is missing.
pub fn build_provider_with<F>(config: &ProviderConfig, env: F) -> Result<Arc<dyn OddsProvider>>
where
    F: Fn(&str) -> Option<String>,
{
    match config.kind {
        ProviderKind::TheOddsApi => {
            let var = config
                .api_key_env
                .as_deref()
                .ok_or_else(|| anyhow!("provider {} has no api_key_env", config.id))?;
            let key = env(var)
                .filter(|k| !k.trim().is_empty())
                .ok_or_else(|| anyhow!("provider {}: environment variable {var} is not set", config.id))?;

            // Transport deadline sits just above the orchestrator's per-attempt timeout.
            let timeout = Duration::from_millis(config.timeout_ms.saturating_add(500));
            let mut provider = TheOddsApiProvider::new(&config.id, SecretString::from(key), timeout)
                .with_context(|| format!("building provider {}", config.id))?
                .with_regions(config.regions.clone())
                .with_sport_keys(config.sport_keys.clone());
            if let Some(url) = &config.base_url {
                provider = provider.with_base_url(url);
            }
            Ok(Arc::new(provider))
        }
        ProviderKind::Fixture => {
            let path = config
                .fixture_path
                .as_ref()
                .ok_or_else(|| anyhow!("provider {} has no fixture_path", config.id))?;
            Ok(Arc::new(FixtureProvider::new(&config.id, path)))
        }
    }
}

/// Builds one adapter reading secrets from the process environment.
///
/// # Errors
///
/// See [`build_provider_with`].
pub fn build_provider(config: &ProviderConfig) -> Result<Arc<dyn OddsProvider>> {
    build_provider_with(config, |var| std::env::var(var).ok())
}

/// Builds every configured provider.
///
/// A disabled provider that cannot be built is skipped; an enabled one is
/// an error.
///
/// # Errors
///
/// Returns the first failure of an enabled provider.
pub fn build_providers_with<F>(config: &AppConfig, env: F) -> Result<Vec<ConfiguredProvider>>
where
    F: Fn(&str) -> Option<String>,
{
    let mut built = Vec::with_capacity(config.providers.len());
    for provider_config in &config.providers {
        match build_provider_with(provider_config, &env) {
            Ok(provider) => {
                info!(
                    provider = %provider_config.id,
                    kind = ?provider_config.kind,
                    enabled = provider_config.enabled,
                    "Configured provider"
                );
                built.push(ConfiguredProvider {
                    provider,
                    config: provider_config.clone(),
                });
            }
            Err(e) if !provider_config.enabled => {
                warn!(provider = %provider_config.id, error = %e, "Skipping disabled provider");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(built)
}

/// Builds every configured provider from the process environment.
///
/// # Errors
///
/// See [`build_providers_with`].
pub fn build_providers(config: &AppConfig) -> Result<Vec<ConfiguredProvider>> {
    build_providers_with(config, |var| std::env::var(var).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(var: &str) -> Option<String> {
        (var == "THE_ODDS_API_KEY").then(|| "abc".to_string())
    }

    #[test]
    fn test_builds_both_kinds() {
        let config = AppConfig {
            providers: vec![
                ProviderConfig::the_odds_api("odds-api"),
                ProviderConfig::fixture("demo", "fixtures/demo.json"),
            ],
            ..AppConfig::default()
        };
        let built = build_providers_with(&config, env).unwrap();
        let ids: Vec<&str> = built.iter().map(|p| p.provider.id()).collect();
        assert_eq!(ids, vec!["odds-api", "demo"]);
    }

    #[test]
    fn test_missing_key_fails_enabled_provider() {
        let config = AppConfig {
            providers: vec![ProviderConfig::the_odds_api("odds-api")],
            ..AppConfig::default()
        };
        let err = build_providers_with(&config, |_| None).unwrap_err();
        assert!(err.to_string().contains("THE_ODDS_API_KEY"));
    }

    #[test]
    fn test_missing_key_skips_disabled_provider() {
        let config = AppConfig {
            providers: vec![
                ProviderConfig::the_odds_api("odds-api").disabled(),
                ProviderConfig::fixture("demo", "fixtures/demo.json"),
            ],
            ..AppConfig::default()
        };
        let built = build_providers_with(&config, |_| None).unwrap();
        assert_eq!(built.len(), 1);
        assert_eq!(built[0].config.id, "demo");
    }

    #[test]
    fn test_fixture_without_path_fails() {
        let mut fixture = ProviderConfig::fixture("demo", "x.json");
        fixture.fixture_path = None;
        assert!(build_provider_with(&fixture, env).is_err());
    }
}
