use crate::bets::{AccountStatus, BetRecord};
use crate::error::ProviderError;
use crate::types::Offer;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// A source of raw offers for a sport.
///
/// Adapters own their authentication and transport. The orchestrator wraps
/// every call with its own timeout, retry and rate-limit policy.
#[async_trait]
pub trait OddsProvider: Send + Sync {
    /// Stable identifier used in errors, latency and health reports.
    fn id(&self) -> &str;

    async fn fetch(&self, sport: &str) -> Result<Vec<Offer>, ProviderError>;
}

/// Durable bet history consumed by the account health manager.
#[async_trait]
pub trait BetHistoryStore: Send + Sync {
    async fn record_bet(&self, bet: BetRecord) -> Result<()>;

    /// Bets for `account_id` placed at or after `since`, oldest first.
    async fn history(&self, account_id: &str, since: DateTime<Utc>) -> Result<Vec<BetRecord>>;

    async fn account_status(&self, account_id: &str) -> Result<AccountStatus>;
}
