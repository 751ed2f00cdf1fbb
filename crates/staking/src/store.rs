//! In-memory bet history store.
//!
//! Durable storage lives outside this workspace; this store backs tests,
//! demos and single-process deployments.

use anyhow::Result;
use arbys_core::{AccountStatus, BetHistoryStore, BetRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct InMemoryBetStore {
    bets: RwLock<HashMap<String, Vec<BetRecord>>>,
    statuses: RwLock<HashMap<String, AccountStatus>>,
}

impl InMemoryBetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the bookmaker-reported status of an account.
    pub fn set_status(&self, account_id: impl Into<String>, status: AccountStatus) {
        self.statuses.write().insert(account_id.into(), status);
    }

    pub fn bet_count(&self, account_id: &str) -> usize {
        self.bets.read().get(account_id).map_or(0, Vec::len)
    }
}

#[async_trait]
impl BetHistoryStore for InMemoryBetStore {
    async fn record_bet(&self, bet: BetRecord) -> Result<()> {
        let mut bets = self.bets.write();
        let history = bets.entry(bet.account_id.clone()).or_default();
        let pos = history.partition_point(|b| b.placed_at <= bet.placed_at);
        history.insert(pos, bet);
        Ok(())
    }

    async fn history(&self, account_id: &str, since: DateTime<Utc>) -> Result<Vec<BetRecord>> {
        Ok(self
            .bets
            .read()
            .get(account_id)
            .map(|bets| bets.iter().filter(|b| b.placed_at >= since).cloned().collect())
            .unwrap_or_default())
    }

    async fn account_status(&self, account_id: &str) -> Result<AccountStatus> {
        Ok(self
            .statuses
            .read()
            .get(account_id)
            .copied()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbys_core::BetKind;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_history_is_ordered_and_windowed() {
        let store = InMemoryBetStore::new();
        let t0 = Utc.with_ymd_and_hms(2026, 1, 10, 12, 0, 0).unwrap();

        for offset in [3, 1, 2] {
            store
                .record_bet(BetRecord::new(
                    "acct",
                    t0 + Duration::days(offset),
                    dec!(20),
                    dec!(2.0),
                    BetKind::Regular,
                ))
                .await
                .unwrap();
        }

        let all = store.history("acct", t0).await.unwrap();
        let days: Vec<i64> = all.iter().map(|b| (b.placed_at - t0).num_days()).collect();
        assert_eq!(days, vec![1, 2, 3]);

        let recent = store.history("acct", t0 + Duration::days(2)).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert!(store.history("other", t0).await.unwrap().is_empty());
        assert_eq!(store.bet_count("acct"), 3);
    }

    #[tokio::test]
    async fn test_status_defaults_to_healthy() {
        let store = InMemoryBetStore::new();
        assert_eq!(store.account_status("new").await.unwrap(), AccountStatus::Healthy);
        store.set_status("new", AccountStatus::Limited);
        assert_eq!(store.account_status("new").await.unwrap(), AccountStatus::Limited);
    }
}
