//! Stealth scoring from bet history.
//!
//! The score starts at 1.0 and loses points for every pattern a bookmaker's
//! risk team looks for: a high share of arbitrage bets, steady profits, a
//! high bet frequency, uniform stake sizes, round-number stakes, bets
//! clustered at the same time of day, long gaps since the last ordinary bet
//! and very recent arbitrage activity. Bookmaker-reported status then scales
//! the result.

use super::{HealthProvider, HealthSignals, HealthSnapshot};
use anyhow::Result;
use arbys_core::{AccountStatus, BetHistoryStore, BetRecord, HealthConfig, RiskLevel};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Timelike, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tracing::debug;

/// Minimum bets before distribution-based signals count.
const MIN_BETS_FOR_PATTERNS: usize = 5;

/// Minimum bets before round-number stakes count.
const MIN_BETS_FOR_ROUNDING: usize = 10;

pub struct AccountHealthManager {
    store: Arc<dyn BetHistoryStore>,
    window: Duration,
}

impl AccountHealthManager {
    pub fn new(store: Arc<dyn BetHistoryStore>, config: &HealthConfig) -> Self {
        Self {
            store,
            window: Duration::days(config.history_window_days.max(1)),
        }
    }

    /// Writes a bet through to the history store.
    ///
    /// Cached snapshots for the account are not touched; callers invalidate
    /// the cache entry after recording.
    ///
    /// # Errors
    ///
    /// Returns the store's error.
    pub async fn record_bet(&self, bet: BetRecord) -> Result<()> {
        self.store.record_bet(bet).await
    }

    /// Scores an account against history up to `now`.
    ///
    /// # Errors
    ///
    /// Returns an error if the history store cannot be read.
    pub async fn compute_at(&self, account_id: &str, now: DateTime<Utc>) -> Result<HealthSnapshot> {
        let history = self.store.history(account_id, now - self.window).await?;
        let status = self.store.account_status(account_id).await?;
        let window_days = self.window.num_days();
        let snapshot = assess(account_id, &history, status, now, window_days);

        debug!(
            account_id,
            bets = history.len(),
            stealth_score = snapshot.stealth_score,
            status = %snapshot.status,
            "Computed account health"
        );
        Ok(snapshot)
    }
}

#[async_trait]
impl HealthProvider for AccountHealthManager {
    async fn snapshot(&self, account_id: &str) -> Result<HealthSnapshot> {
        self.compute_at(account_id, Utc::now()).await
    }
}

impl std::fmt::Debug for AccountHealthManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountHealthManager")
            .field("window_days", &self.window.num_days())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Scoring
// =============================================================================

fn extract_signals(history: &[BetRecord], now: DateTime<Utc>, window_days: i64) -> HealthSignals {
    let n = history.len();
    if n == 0 {
        return HealthSignals::default();
    }

    let arb_count = history.iter().filter(|b| b.is_arbitrage()).count();
    let net_profit: Decimal = history.iter().filter_map(|b| b.profit_loss).sum();
    let stakes: Vec<f64> = history
        .iter()
        .map(|b| b.stake.to_f64().unwrap_or_default())
        .collect();

    let stake_cv = (n >= MIN_BETS_FOR_PATTERNS).then(|| {
        let mean = stakes.iter().sum::<f64>() / n as f64;
        if mean <= 0.0 {
            return 0.0;
        }
        let variance = stakes.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n as f64;
        variance.sqrt() / mean
    });

    let hour_concentration = (n >= MIN_BETS_FOR_PATTERNS).then(|| {
        let mut bands = [0usize; 12];
        for bet in history {
            bands[(bet.placed_at.hour() / 2) as usize] += 1;
        }
        bands.iter().copied().max().unwrap_or(0) as f64 / n as f64
    });

    let round_stakes = history.iter().filter(|b| b.stake.fract().is_zero()).count();

    let last_regular = history.iter().filter(|b| !b.is_arbitrage()).map(|b| b.placed_at).max();
    let last_arb = history.iter().filter(|b| b.is_arbitrage()).map(|b| b.placed_at).max();

    HealthSignals {
        bets_in_window: n,
        arb_ratio: arb_count as f64 / n as f64,
        net_profit,
        bets_per_day: n as f64 / window_days.max(1) as f64,
        stake_cv,
        round_stake_ratio: round_stakes as f64 / n as f64,
        hour_concentration,
        days_since_regular: last_regular.map(|t| (now - t).num_days()),
        hours_since_arb: last_arb.map(|t| (now - t).num_hours()),
    }
}

fn score_signals(signals: &HealthSignals) -> f64 {
    let mut score: f64 = 1.0;
    if signals.bets_in_window == 0 {
        return score;
    }

    let arb = signals.arb_ratio;
    if arb > 0.8 {
        score -= 0.30;
    } else if arb > 0.6 {
        score -= 0.15;
    } else if arb > 0.4 {
        score -= 0.05;
    } else if arb < 0.3 {
        score += 0.05;
    }

    if signals.net_profit > dec!(1000) {
        score -= 0.20;
    } else if signals.net_profit > dec!(500) {
        score -= 0.10;
    } else if signals.net_profit < Decimal::ZERO {
        score += 0.05;
    }

    if signals.bets_per_day > 10.0 {
        score -= 0.15;
    } else if signals.bets_per_day > 5.0 {
        score -= 0.05;
    }

    match signals.stake_cv {
        Some(cv) if cv < 0.05 => score -= 0.15,
        Some(cv) if cv < 0.15 => score -= 0.05,
        _ => {}
    }

    if signals.bets_in_window >= MIN_BETS_FOR_ROUNDING && signals.round_stake_ratio > 0.8 {
        score -= 0.03;
    }

    if signals.hour_concentration.is_some_and(|c| c > 0.7) {
        score -= 0.10;
    }

    match signals.days_since_regular {
        Some(days) if days > 30 => score -= 0.15,
        Some(days) if days > 14 => score -= 0.10,
        Some(days) if days > 7 => score -= 0.05,
        _ => {}
    }

    match signals.hours_since_arb {
        Some(hours) if hours < 1 => score -= 0.10,
        Some(hours) if hours < 6 => score -= 0.05,
        _ => {}
    }

    score
}

fn apply_status(score: f64, status: AccountStatus) -> f64 {
    let score = score.clamp(0.0, 1.0);
    let scaled = match status {
        AccountStatus::Closed => 0.0,
        AccountStatus::Limited => score * 0.4,
        AccountStatus::UnderReview => score * 0.7,
        AccountStatus::Healthy => score,
    };
    scaled.clamp(0.0, 1.0)
}

fn risk_level(score: f64, status: AccountStatus) -> RiskLevel {
    match status {
        AccountStatus::Closed | AccountStatus::Limited => RiskLevel::High,
        _ if score < 0.2 => RiskLevel::High,
        AccountStatus::UnderReview => RiskLevel::Medium,
        _ if score < 0.5 => RiskLevel::Medium,
        _ => RiskLevel::Low,
    }
}

/// Suggested stake scaling for a score, status and arbitrage share.
pub fn stake_multiplier(score: f64, status: AccountStatus, arb_ratio: f64) -> f64 {
    let mut multiplier: f64 = if score < 0.3 {
        0.3
    } else if score < 0.5 {
        0.6
    } else if score < 0.7 {
        0.8
    } else {
        1.0
    };

    match status {
        AccountStatus::Closed => return 0.0,
        AccountStatus::Limited => multiplier = multiplier.min(0.4),
        AccountStatus::UnderReview => multiplier = multiplier.min(0.7),
        AccountStatus::Healthy => {
            if score >= 0.8 && (0.3..=0.6).contains(&arb_ratio) {
                multiplier *= 1.2;
            }
        }
    }

    multiplier.min(1.5)
}

/// Builds a snapshot from raw history. Pure; `now` anchors every recency signal.
pub fn assess(
    account_id: &str,
    history: &[BetRecord],
    status: AccountStatus,
    now: DateTime<Utc>,
    window_days: i64,
) -> HealthSnapshot {
    let signals = extract_signals(history, now, window_days);
    let stealth_score = apply_status(score_signals(&signals), status);

    HealthSnapshot {
        account_id: account_id.to_string(),
        stealth_score,
        status,
        risk_level: risk_level(stealth_score, status),
        recommended_stake_multiplier: stake_multiplier(stealth_score, status, signals.arb_ratio),
        signals,
        as_of: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryBetStore;
    use arbys_core::BetKind;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 1, 18, 0, 0).unwrap()
    }

    fn bet(hours_ago: i64, stake: Decimal, kind: BetKind) -> BetRecord {
        BetRecord::new("acct", now() - Duration::hours(hours_ago), stake, dec!(2.0), kind)
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    // ==================== Scoring Tests ====================

    #[test]
    fn test_empty_history_is_pristine() {
        let snapshot = assess("new", &[], AccountStatus::Healthy, now(), 30);
        assert!(approx(snapshot.stealth_score, 1.0));
        assert_eq!(snapshot.risk_level, RiskLevel::Low);
        assert!(approx(snapshot.recommended_stake_multiplier, 1.0));
    }

    #[test]
    fn test_casual_history_scores_high() {
        // Varied stakes, spread across the day, mostly regular bets, recent regular activity.
        let history: Vec<BetRecord> = [
            (200, dec!(12.35), BetKind::Regular),
            (150, dec!(40.10), BetKind::Regular),
            (101, dec!(7.80), BetKind::Regular),
            (75, dec!(25.55), BetKind::Arbitrage),
            (30, dec!(18.20), BetKind::Regular),
            (13, dec!(60.75), BetKind::Regular),
        ]
        .into_iter()
        .map(|(h, s, k)| bet(h, s, k))
        .collect();

        let snapshot = assess("acct", &history, AccountStatus::Healthy, now(), 30);
        // arb ratio 1/6 < 0.3 gives +0.05 before clamping.
        assert!(approx(snapshot.stealth_score, 1.0));
        assert_eq!(snapshot.risk_level, RiskLevel::Low);
    }

    #[test]
    fn test_scripted_history_scores_low() {
        // Arbitrage only, identical stakes, same hour every day, an arb an hour ago.
        let history: Vec<BetRecord> = (0..20)
            .map(|day| {
                let mut b = bet(24 * day, dec!(50), BetKind::Arbitrage);
                b.profit_loss = Some(dec!(20));
                b
            })
            .collect();

        let snapshot = assess("acct", &history, AccountStatus::Healthy, now(), 30);
        // -0.30 arb, -0.15 cv, -0.03 round, -0.10 hours, -0.10 recent arb
        assert!(approx(snapshot.stealth_score, 1.0 - 0.30 - 0.15 - 0.03 - 0.10 - 0.10));
        assert_eq!(snapshot.risk_level, RiskLevel::Medium);
        assert!(approx(snapshot.recommended_stake_multiplier, 0.6));
        assert_eq!(snapshot.signals.hours_since_arb, Some(0));
        assert_eq!(snapshot.signals.days_since_regular, None);
    }

    #[test]
    fn test_regular_bet_recency_penalty() {
        let history = vec![
            bet(24 * 20, dec!(15.5), BetKind::Regular),
            bet(24 * 2, dec!(22.1), BetKind::Arbitrage),
            bet(24 * 3, dec!(31.4), BetKind::Arbitrage),
        ];
        let signals = extract_signals(&history, now(), 30);
        assert_eq!(signals.days_since_regular, Some(20));
        // arb 2/3 > 0.6: -0.15; 20 days since regular: -0.10
        assert!(approx(score_signals(&signals), 1.0 - 0.15 - 0.10));
    }

    #[test]
    fn test_arbitrage_only_history_has_no_recency_penalty() {
        let history = vec![
            bet(24 * 2, dec!(22.1), BetKind::Arbitrage),
            bet(24 * 9, dec!(31.4), BetKind::Arbitrage),
        ];
        let signals = extract_signals(&history, now(), 30);
        assert_eq!(signals.days_since_regular, None);
        // Only the arbitrage ratio (> 80%: -0.30) penalises the missing regular bets.
        assert!(approx(score_signals(&signals), 1.0 - 0.30));
    }

    #[test]
    fn test_status_scaling() {
        let history = vec![bet(10, dec!(20.5), BetKind::Regular)];
        let healthy = assess("a", &history, AccountStatus::Healthy, now(), 30);
        let review = assess("a", &history, AccountStatus::UnderReview, now(), 30);
        let limited = assess("a", &history, AccountStatus::Limited, now(), 30);
        let closed = assess("a", &history, AccountStatus::Closed, now(), 30);

        assert!(approx(review.stealth_score, healthy.stealth_score * 0.7));
        assert!(approx(limited.stealth_score, healthy.stealth_score * 0.4));
        assert!(approx(closed.stealth_score, 0.0));
        assert_eq!(review.risk_level, RiskLevel::Medium);
        assert_eq!(limited.risk_level, RiskLevel::High);
        assert!(approx(closed.recommended_stake_multiplier, 0.0));
    }

    #[test]
    fn test_frequency_signal() {
        let history: Vec<BetRecord> = (0..330)
            .map(|i| bet(i * 2 + 200, Decimal::new(1000 + i, 2), BetKind::Regular))
            .collect();
        let signals = extract_signals(&history, now(), 30);
        assert!(signals.bets_per_day > 10.0);
    }

    // ==================== Multiplier Tests ====================

    #[test]
    fn test_stake_multiplier_bands() {
        assert!(approx(stake_multiplier(0.25, AccountStatus::Healthy, 0.9), 0.3));
        assert!(approx(stake_multiplier(0.45, AccountStatus::Healthy, 0.9), 0.6));
        assert!(approx(stake_multiplier(0.65, AccountStatus::Healthy, 0.9), 0.8));
        assert!(approx(stake_multiplier(0.75, AccountStatus::Healthy, 0.9), 1.0));
    }

    #[test]
    fn test_stake_multiplier_status_caps_and_boost() {
        assert!(approx(stake_multiplier(0.9, AccountStatus::Healthy, 0.45), 1.2));
        assert!(approx(stake_multiplier(0.9, AccountStatus::Limited, 0.45), 0.4));
        assert!(approx(stake_multiplier(0.9, AccountStatus::UnderReview, 0.45), 0.7));
        assert!(approx(stake_multiplier(0.9, AccountStatus::Closed, 0.45), 0.0));
    }

    // ==================== Manager Tests ====================

    #[tokio::test]
    async fn test_manager_reads_window_and_status() {
        let store = Arc::new(InMemoryBetStore::new());
        store.set_status("acct", AccountStatus::UnderReview);
        let manager = AccountHealthManager::new(store.clone(), &HealthConfig::default());

        manager
            .record_bet(bet(24 * 45, dec!(100), BetKind::Arbitrage))
            .await
            .unwrap();
        manager
            .record_bet(bet(5, dec!(14.2), BetKind::Regular))
            .await
            .unwrap();

        let snapshot = manager.compute_at("acct", now()).await.unwrap();
        assert_eq!(snapshot.signals.bets_in_window, 1);
        assert_eq!(snapshot.status, AccountStatus::UnderReview);
        assert_eq!(store.bet_count("acct"), 2);
        assert_eq!(snapshot.as_of, now());
    }

    #[tokio::test]
    async fn test_unknown_account_is_pristine() {
        let manager = AccountHealthManager::new(Arc::new(InMemoryBetStore::new()), &HealthConfig::default());
        let snapshot = manager.compute_at("nobody", now()).await.unwrap();
        assert!(approx(snapshot.stealth_score, 1.0));
        assert_eq!(snapshot.status, AccountStatus::Healthy);
    }
}
