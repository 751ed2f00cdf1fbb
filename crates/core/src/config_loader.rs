use crate::config::AppConfig;
use anyhow::Result;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use std::path::Path;

/// Default location of the configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/Config.toml";

/// Prefix for environment overrides, e.g. `ARBYS_DETECTOR__MIN_PROFIT_PCT=2.5`.
pub const ENV_PREFIX: &str = "ARBYS_";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads configuration from [`DEFAULT_CONFIG_PATH`] and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be parsed.
    pub fn load() -> Result<AppConfig> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Loads configuration by layering built-in defaults, a TOML file and
    /// `ARBYS_`-prefixed environment variables (`__` separates sections).
    ///
    /// A missing file is not an error; defaults and environment still apply.
    ///
    /// # Errors
    ///
    /// Returns an error if the file or an environment value cannot be parsed.
    pub fn load_from(path: impl AsRef<Path>) -> Result<AppConfig> {
        let config: AppConfig = Self::figment(path).extract()?;
        Ok(config)
    }

    /// The layered figment, exposed for callers that extract sub-sections.
    pub fn figment(path: impl AsRef<Path>) -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }
}
