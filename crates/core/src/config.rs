use anyhow::{bail, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub fetch: FetchConfig,
    pub providers: Vec<ProviderConfig>,
    pub normalizer: NormalizerConfig,
    pub detector: DetectorConfig,
    pub health: HealthConfig,
    pub allocator: AllocatorConfig,
}

impl AppConfig {
    /// Providers with `enabled = true`.
    pub fn enabled_providers(&self) -> impl Iterator<Item = &ProviderConfig> {
        self.providers.iter().filter(|p| p.enabled)
    }

    /// Checks structural requirements that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first violated requirement.
    pub fn validate(&self) -> Result<()> {
        if self.enabled_providers().next().is_none() {
            bail!("no enabled providers configured");
        }
        let mut seen = std::collections::BTreeSet::new();
        for provider in &self.providers {
            if !seen.insert(provider.id.as_str()) {
                bail!("duplicate provider id: {}", provider.id);
            }
            if provider.timeout_ms == 0 {
                bail!("provider {}: timeout_ms must be positive", provider.id);
            }
            if provider.requests_per_second == 0 {
                bail!("provider {}: requests_per_second must be positive", provider.id);
            }
            if provider.daily_quota == Some(0) {
                bail!("provider {}: daily_quota must be positive when set", provider.id);
            }
        }
        if self.fetch.global_timeout_ms == 0 {
            bail!("fetch.global_timeout_ms must be positive");
        }
        if !(0.0..=1.0).contains(&self.normalizer.min_name_similarity) {
            bail!("normalizer.min_name_similarity must be within [0, 1]");
        }
        if self.health.ttl_secs == 0 {
            bail!("health.ttl_secs must be positive");
        }
        let pct = self.allocator.max_bankroll_pct;
        if pct <= Decimal::ZERO || pct > Decimal::ONE_HUNDRED {
            bail!("allocator.max_bankroll_pct must be within (0, 100]");
        }
        if self.allocator.jitter_pct < Decimal::ZERO || self.allocator.jitter_pct >= dec!(50) {
            bail!("allocator.jitter_pct must be within [0, 50)");
        }
        Ok(())
    }
}

// =============================================================================
// Server / Fetch
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Wall-clock ceiling for one fetch cycle across all providers.
    pub global_timeout_ms: u64,
    pub default_sport: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            global_timeout_ms: 15_000,
            default_sport: "soccer".to_string(),
        }
    }
}

/// Which adapter implementation serves a provider entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[default]
    TheOddsApi,
    Fixture,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub id: String,
    pub kind: ProviderKind,
    pub enabled: bool,
    /// Deadline for a single attempt.
    pub timeout_ms: u64,
    pub max_retries: u32,
    /// First retry delay; doubles per attempt.
    pub backoff_ms: u64,
    pub requests_per_second: u32,
    /// Requests allowed per 24h window, if the provider publishes one.
    pub daily_quota: Option<u32>,
    pub base_url: Option<String>,
    /// Name of the environment variable holding the API key.
    pub api_key_env: Option<String>,
    pub regions: Vec<String>,
    /// Maps pipeline sport names to provider sport keys.
    pub sport_keys: BTreeMap<String, String>,
    pub fixture_path: Option<PathBuf>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            kind: ProviderKind::TheOddsApi,
            enabled: true,
            timeout_ms: 5_000,
            max_retries: 1,
            backoff_ms: 250,
            requests_per_second: 2,
            daily_quota: None,
            base_url: None,
            api_key_env: None,
            regions: vec!["us".to_string(), "uk".to_string()],
            sport_keys: BTreeMap::new(),
            fixture_path: None,
        }
    }
}

impl ProviderConfig {
    /// The Odds API entry with its v4 endpoint.
    pub fn the_odds_api(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: ProviderKind::TheOddsApi,
            base_url: Some("https://api.the-odds-api.com/v4".to_string()),
            api_key_env: Some("THE_ODDS_API_KEY".to_string()),
            ..Self::default()
        }
    }

    /// Offline provider reading offers from a JSON file.
    pub fn fixture(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            kind: ProviderKind::Fixture,
            fixture_path: Some(path.into()),
            max_retries: 0,
            requests_per_second: 100,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    #[must_use]
    pub fn with_retries(mut self, max_retries: u32, backoff_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.backoff_ms = backoff_ms;
        self
    }

    #[must_use]
    pub fn with_requests_per_second(mut self, rps: u32) -> Self {
        self.requests_per_second = rps;
        self
    }

    #[must_use]
    pub fn with_daily_quota(mut self, quota: u32) -> Self {
        self.daily_quota = Some(quota);
        self
    }

    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Provider sport key for a pipeline sport, defaulting to the sport itself.
    #[must_use]
    pub fn sport_key<'a>(&'a self, sport: &'a str) -> &'a str {
        self.sport_keys.get(sport).map_or(sport, String::as_str)
    }
}

// =============================================================================
// Pipeline stages
// =============================================================================

/// Event and outcome matching policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    /// Maximum start-time difference for two listings to be the same event.
    pub start_tolerance_minutes: i64,
    /// Minimum token-set similarity for participant names.
    pub min_name_similarity: f64,
    /// Offers older than this are excluded.
    pub staleness_hours: i64,
    /// Tokens dropped before comparing names.
    pub noise_tokens: Vec<String>,
    /// Alternative spelling -> canonical spelling.
    pub aliases: BTreeMap<String, String>,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        let noise_tokens = ["fc", "afc", "cf", "sc", "ac", "the", "club", "de"]
            .iter()
            .map(|s| (*s).to_string())
            .collect();
        let aliases = [
            ("man utd", "manchester united"),
            ("man united", "manchester united"),
            ("man city", "manchester city"),
            ("spurs", "tottenham hotspur"),
            ("tottenham", "tottenham hotspur"),
            ("wolves", "wolverhampton wanderers"),
            ("psg", "paris saint germain"),
            ("inter", "internazionale"),
        ]
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();

        Self {
            start_tolerance_minutes: 30,
            min_name_similarity: 0.6,
            staleness_hours: 24,
            noise_tokens,
            aliases,
        }
    }
}

impl NormalizerConfig {
    #[must_use]
    pub fn with_start_tolerance_minutes(mut self, minutes: i64) -> Self {
        self.start_tolerance_minutes = minutes;
        self
    }

    #[must_use]
    pub fn with_min_name_similarity(mut self, similarity: f64) -> Self {
        self.min_name_similarity = similarity;
        self
    }

    #[must_use]
    pub fn with_staleness_hours(mut self, hours: i64) -> Self {
        self.staleness_hours = hours;
        self
    }

    #[must_use]
    pub fn with_alias(mut self, alias: impl Into<String>, canonical: impl Into<String>) -> Self {
        self.aliases.insert(alias.into(), canonical.into());
        self
    }
}

/// Arbitrage detection thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Default threshold when the caller does not supply one.
    pub min_profit_pct: Decimal,
    pub staleness_hours: i64,
    /// Quotes older than this raise the opportunity's risk level.
    pub max_quote_age_minutes: i64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_profit_pct: dec!(1.0),
            staleness_hours: 24,
            max_quote_age_minutes: 30,
        }
    }
}

impl DetectorConfig {
    /// Only wide margins.
    #[must_use]
    pub fn conservative() -> Self {
        Self {
            min_profit_pct: dec!(2.0),
            max_quote_age_minutes: 10,
            ..Self::default()
        }
    }

    /// Thin margins included.
    #[must_use]
    pub fn aggressive() -> Self {
        Self {
            min_profit_pct: dec!(0.5),
            max_quote_age_minutes: 60,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_min_profit_pct(mut self, pct: Decimal) -> Self {
        self.min_profit_pct = pct;
        self
    }

    #[must_use]
    pub fn with_staleness_hours(mut self, hours: i64) -> Self {
        self.staleness_hours = hours;
        self
    }

    #[must_use]
    pub fn with_max_quote_age_minutes(mut self, minutes: i64) -> Self {
        self.max_quote_age_minutes = minutes;
        self
    }
}

/// Account health cache and scoring window.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub ttl_secs: u64,
    /// How long past expiry a snapshot may still be served if recomputation fails.
    pub grace_secs: u64,
    pub history_window_days: i64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 60,
            grace_secs: 300,
            history_window_days: 30,
        }
    }
}

impl HealthConfig {
    #[must_use]
    pub fn with_ttl_secs(mut self, ttl_secs: u64) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }

    #[must_use]
    pub fn with_grace_secs(mut self, grace_secs: u64) -> Self {
        self.grace_secs = grace_secs;
        self
    }
}

/// Stake sizing, rounding and jitter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatorConfig {
    /// Share of bankroll committed to one opportunity, in percent.
    pub max_bankroll_pct: Decimal,
    /// Stakes below this draw a warning.
    pub min_stake: Decimal,
    /// Maximum jitter applied to each stake, in percent. Zero disables it.
    pub jitter_pct: Decimal,
    /// Stealth score at or above which natural increments are used.
    pub stealth_rounding_threshold: f64,
    /// Stealth score below which the plan carries a critical warning.
    pub critical_stealth_threshold: f64,
    /// Stakes above this round to 0.10 instead of 0.05.
    pub coarse_increment_above: Decimal,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            max_bankroll_pct: dec!(5),
            min_stake: dec!(10),
            jitter_pct: dec!(5),
            stealth_rounding_threshold: 0.5,
            critical_stealth_threshold: 0.2,
            coarse_increment_above: dec!(50),
        }
    }
}

impl AllocatorConfig {
    #[must_use]
    pub fn with_max_bankroll_pct(mut self, pct: Decimal) -> Self {
        self.max_bankroll_pct = pct;
        self
    }

    #[must_use]
    pub fn with_min_stake(mut self, min_stake: Decimal) -> Self {
        self.min_stake = min_stake;
        self
    }

    #[must_use]
    pub fn with_jitter_pct(mut self, jitter_pct: Decimal) -> Self {
        self.jitter_pct = jitter_pct;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> AppConfig {
        AppConfig {
            providers: vec![ProviderConfig::fixture("demo", "fixtures/demo.json")],
            ..AppConfig::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.server.addr(), "0.0.0.0:8080");
        assert_eq!(config.health.ttl_secs, 60);
        assert_eq!(config.allocator.max_bankroll_pct, dec!(5));
        assert_eq!(config.detector.min_profit_pct, dec!(1.0));
        assert_eq!(config.fetch.default_sport, "soccer");
    }

    #[test]
    fn test_validate_requires_enabled_provider() {
        assert!(AppConfig::default().validate().is_err());

        let mut config = valid_config();
        assert!(config.validate().is_ok());

        config.providers[0].enabled = false;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_duplicate_ids() {
        let mut config = valid_config();
        config
            .providers
            .push(ProviderConfig::the_odds_api("demo"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_bankroll_pct() {
        let mut config = valid_config();
        config.allocator.max_bankroll_pct = dec!(0);
        assert!(config.validate().is_err());
        config.allocator.max_bankroll_pct = dec!(101);
        assert!(config.validate().is_err());
        config.allocator.max_bankroll_pct = dec!(100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_provider_presets() {
        let api = ProviderConfig::the_odds_api("the_odds_api").with_daily_quota(100);
        assert_eq!(api.kind, ProviderKind::TheOddsApi);
        assert_eq!(api.daily_quota, Some(100));
        assert_eq!(api.api_key_env.as_deref(), Some("THE_ODDS_API_KEY"));

        let fixture = ProviderConfig::fixture("demo", "a.json").disabled();
        assert_eq!(fixture.kind, ProviderKind::Fixture);
        assert!(!fixture.enabled);
    }

    #[test]
    fn test_sport_key_mapping() {
        let mut api = ProviderConfig::the_odds_api("odds");
        api.sport_keys
            .insert("soccer".to_string(), "soccer_epl".to_string());
        assert_eq!(api.sport_key("soccer"), "soccer_epl");
        assert_eq!(api.sport_key("basketball_nba"), "basketball_nba");
    }

    #[test]
    fn test_detector_presets() {
        assert!(DetectorConfig::conservative().min_profit_pct > DetectorConfig::default().min_profit_pct);
        assert!(DetectorConfig::aggressive().min_profit_pct < DetectorConfig::default().min_profit_pct);
    }
}
