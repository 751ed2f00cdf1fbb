//! Loads configuration, validates it and reports what would run.

use crate::runtime;
use anyhow::Result;
use arbys_core::config_loader::DEFAULT_CONFIG_PATH;
use arbys_core::{AppConfig, ProviderKind};
use clap::Args;
use std::path::PathBuf;

/// Arguments for the check-config command.
#[derive(Args, Debug, Clone)]
pub struct CheckConfigArgs {
    /// Config file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,
}

/// One line per provider with what it still needs to run.
fn provider_lines<F>(config: &AppConfig, env_set: F) -> Vec<String>
where
    F: Fn(&str) -> bool,
{
    config
        .providers
        .iter()
        .map(|p| {
            let state = if p.enabled { "enabled" } else { "disabled" };
            let detail = match p.kind {
                ProviderKind::TheOddsApi => match p.api_key_env.as_deref() {
                    Some(var) if env_set(var) => format!("api key from ${var}"),
                    Some(var) => format!("MISSING ${var}"),
                    None => "MISSING api_key_env".to_string(),
                },
                ProviderKind::Fixture => match &p.fixture_path {
                    Some(path) if path.exists() => format!("fixture {}", path.display()),
                    Some(path) => format!("MISSING fixture {}", path.display()),
                    None => "MISSING fixture_path".to_string(),
                },
            };
            let quota = p
                .daily_quota
                .map_or_else(String::new, |q| format!(", {q}/day"));
            format!(
                "  {:<16} {:<9} {:?} timeout={}ms rps={}{} ({})",
                p.id, state, p.kind, p.timeout_ms, p.requests_per_second, quota, detail
            )
        })
        .collect()
}

/// Runs the check-config command.
///
/// # Errors
/// Returns an error if the configuration cannot be loaded or is invalid.
pub fn run_check_config(args: CheckConfigArgs) -> Result<()> {
    let config = runtime::load_config(&args.config)?;

    println!("Configuration OK: {}", args.config.display());
    println!("  server:   {}", config.server.addr());
    println!(
        "  fetch:    global timeout {}ms, default sport {}",
        config.fetch.global_timeout_ms, config.fetch.default_sport
    );
    println!(
        "  detector: min profit {}%, max quote age {}m",
        config.detector.min_profit_pct, config.detector.max_quote_age_minutes
    );
    println!(
        "  staking:  cap {}% of bankroll, min stake {}, jitter {}%",
        config.allocator.max_bankroll_pct, config.allocator.min_stake, config.allocator.jitter_pct
    );
    println!("Providers:");
    for line in provider_lines(&config, |var| std::env::var(var).is_ok()) {
        println!("{line}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbys_core::ProviderConfig;

    #[test]
    fn test_provider_lines_flag_missing_requirements() {
        let config = AppConfig {
            providers: vec![
                ProviderConfig::the_odds_api("odds-api").with_daily_quota(500),
                ProviderConfig::fixture("demo", "/nonexistent/demo.json").disabled(),
            ],
            ..AppConfig::default()
        };

        let lines = provider_lines(&config, |_| false);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("MISSING $THE_ODDS_API_KEY"));
        assert!(lines[0].contains("500/day"));
        assert!(lines[1].contains("disabled"));
        assert!(lines[1].contains("MISSING fixture"));

        let with_key = provider_lines(&config, |var| var == "THE_ODDS_API_KEY");
        assert!(with_key[0].contains("api key from $THE_ODDS_API_KEY"));
    }
}
