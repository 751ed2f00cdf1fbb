//! Core types, traits and configuration for the odds arbitrage pipeline.

pub mod bets;
pub mod config;
pub mod config_loader;
pub mod error;
pub mod odds;
pub mod traits;
pub mod types;

pub use bets::{AccountStatus, BetKind, BetRecord};
pub use config::{
    AllocatorConfig, AppConfig, DetectorConfig, FetchConfig, HealthConfig, NormalizerConfig,
    ProviderConfig, ProviderKind, ServerConfig,
};
pub use config_loader::ConfigLoader;
pub use error::ProviderError;
pub use odds::{implied_probability, OddsError, OddsFormat};
pub use traits::{BetHistoryStore, OddsProvider};
pub use types::{
    CanonicalEvent, EventDescriptor, Offer, Opportunity, OpportunityLeg, Outcome, OutcomeKey,
    RiskLevel, H2H_MARKET,
};
