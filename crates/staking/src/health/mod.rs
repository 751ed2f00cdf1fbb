//! Per-account health: scoring from bet history and a TTL cache in front of it.

mod cache;
mod manager;

pub use cache::{AccountHealthCache, CacheStats, HealthLookup, LookupSource, WarmReport};
pub use manager::{assess, stake_multiplier, AccountHealthManager};

use anyhow::Result;
use arbys_core::{AccountStatus, RiskLevel};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

/// Behavioral signals extracted from an account's recent history.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HealthSignals {
    pub bets_in_window: usize,
    /// Share of arbitrage bets, `0..=1`.
    pub arb_ratio: f64,
    pub net_profit: Decimal,
    pub bets_per_day: f64,
    /// Coefficient of variation of stake sizes; `None` below five bets.
    pub stake_cv: Option<f64>,
    /// Share of whole-dollar stakes.
    pub round_stake_ratio: f64,
    /// Largest share of bets placed in one two-hour band; `None` below five bets.
    pub hour_concentration: Option<f64>,
    pub days_since_regular: Option<i64>,
    pub hours_since_arb: Option<i64>,
}

/// Derived risk view of one account at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSnapshot {
    pub account_id: String,
    /// `0..=1`; higher blends in more, lower looks scripted.
    pub stealth_score: f64,
    pub status: AccountStatus,
    pub risk_level: RiskLevel,
    /// Suggested scaling of stakes, `0..=1.5`.
    pub recommended_stake_multiplier: f64,
    pub signals: HealthSignals,
    pub as_of: DateTime<Utc>,
}

impl HealthSnapshot {
    /// Snapshot for an account with no history at all.
    pub fn pristine(account_id: impl Into<String>, as_of: DateTime<Utc>) -> Self {
        Self {
            account_id: account_id.into(),
            stealth_score: 1.0,
            status: AccountStatus::Healthy,
            risk_level: RiskLevel::Low,
            recommended_stake_multiplier: 1.0,
            signals: HealthSignals::default(),
            as_of,
        }
    }
}

/// Anything that can compute a fresh snapshot for an account.
#[async_trait]
pub trait HealthProvider: Send + Sync {
    async fn snapshot(&self, account_id: &str) -> Result<HealthSnapshot>;
}
