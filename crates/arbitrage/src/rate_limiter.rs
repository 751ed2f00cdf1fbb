//! Per-provider rate limiting.
//!
//! Each provider gets one [`ProviderRateLimiter`], built once at startup and
//! owned by the orchestrator. It combines two limits:
//!
//! - a token bucket sized to the provider's per-second allowance, and
//! - an optional fixed 24h window for providers that publish a daily quota
//!   (e.g. a free tier capped at 100 requests/day).
//!
//! Acquisition never waits. A provider without capacity fails fast with
//! [`ProviderError::RateLimited`] or [`ProviderError::QuotaExhausted`], so a
//! throttled source degrades its own contribution instead of stalling the
//! cycle. Every attempt, retries included, goes through [`try_acquire`], so
//! the daily quota holds even under retry.
//!
//! [`try_acquire`]: ProviderRateLimiter::try_acquire

use arbys_core::ProviderError;
use chrono::{DateTime, Duration, Utc};
use governor::{
    clock::DefaultClock,
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use nonzero_ext::nonzero;
use parking_lot::Mutex;
use std::num::NonZeroU32;
use tracing::debug;

type GovernorLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

/// Fixed-window counter; the window opens on first use.
#[derive(Debug)]
struct DailyWindow {
    opened_at: Option<DateTime<Utc>>,
    used: u32,
}

impl DailyWindow {
    fn roll(&mut self, now: DateTime<Utc>) {
        match self.opened_at {
            Some(opened) if now - opened < Duration::hours(24) => {}
            _ => {
                self.opened_at = Some(now);
                self.used = 0;
            }
        }
    }
}

/// Token bucket plus optional daily quota for a single provider.
pub struct ProviderRateLimiter {
    provider_id: String,
    burst: GovernorLimiter,
    daily_quota: Option<u32>,
    daily: Mutex<DailyWindow>,
}

impl ProviderRateLimiter {
    /// Creates a limiter allowing `requests_per_second` with an optional daily cap.
    ///
    /// A zero rate is treated as one request per second.
    pub fn new(
        provider_id: impl Into<String>,
        requests_per_second: u32,
        daily_quota: Option<u32>,
    ) -> Self {
        let rps = NonZeroU32::new(requests_per_second).unwrap_or(nonzero!(1u32));
        Self {
            provider_id: provider_id.into(),
            burst: RateLimiter::direct(Quota::per_second(rps)),
            daily_quota,
            daily: Mutex::new(DailyWindow {
                opened_at: None,
                used: 0,
            }),
        }
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    /// Takes capacity for one request.
    ///
    /// # Errors
    ///
    /// Returns `QuotaExhausted` when the daily window is used up and
    /// `RateLimited` when the token bucket is empty.
    pub fn try_acquire(&self) -> Result<(), ProviderError> {
        self.try_acquire_at(Utc::now())
    }

    /// Same as [`try_acquire`](Self::try_acquire) against an explicit wall clock
    /// for the daily window.
    ///
    /// # Errors
    ///
    /// See [`try_acquire`](Self::try_acquire).
    pub fn try_acquire_at(&self, now: DateTime<Utc>) -> Result<(), ProviderError> {
        let mut daily = self.daily.lock();
        daily.roll(now);

        if let Some(limit) = self.daily_quota {
            if daily.used >= limit {
                debug!(provider = %self.provider_id, limit, "Daily quota exhausted");
                return Err(ProviderError::QuotaExhausted { limit });
            }
        }

        if self.burst.check().is_err() {
            debug!(provider = %self.provider_id, "Token bucket empty");
            return Err(ProviderError::rate_limited(1));
        }

        daily.used += 1;
        Ok(())
    }

    /// Requests left in the current daily window, if a quota is configured.
    pub fn daily_remaining(&self) -> Option<u32> {
        self.daily_remaining_at(Utc::now())
    }

    pub fn daily_remaining_at(&self, now: DateTime<Utc>) -> Option<u32> {
        let limit = self.daily_quota?;
        let mut daily = self.daily.lock();
        daily.roll(now);
        Some(limit.saturating_sub(daily.used))
    }

    pub fn daily_quota(&self) -> Option<u32> {
        self.daily_quota
    }
}

impl std::fmt::Debug for ProviderRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRateLimiter")
            .field("provider_id", &self.provider_id)
            .field("daily_quota", &self.daily_quota)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 8, 0, 0).unwrap()
    }

    // ==================== Token Bucket Tests ====================

    #[test]
    fn test_burst_allows_rate_then_rejects() {
        let limiter = ProviderRateLimiter::new("fast", 3, None);
        for _ in 0..3 {
            assert!(limiter.try_acquire_at(t0()).is_ok());
        }
        assert_eq!(
            limiter.try_acquire_at(t0()),
            Err(ProviderError::rate_limited(1))
        );
    }

    #[test]
    fn test_zero_rate_treated_as_one() {
        let limiter = ProviderRateLimiter::new("slow", 0, None);
        assert!(limiter.try_acquire_at(t0()).is_ok());
        assert!(limiter.try_acquire_at(t0()).is_err());
    }

    // ==================== Daily Quota Tests ====================

    #[test]
    fn test_daily_quota_never_exceeded() {
        let limiter = ProviderRateLimiter::new("free", 1_000, Some(100));
        let mut granted = 0;
        for _ in 0..250 {
            if limiter.try_acquire_at(t0()).is_ok() {
                granted += 1;
            }
        }
        assert_eq!(granted, 100);
        assert_eq!(limiter.daily_remaining_at(t0()), Some(0));
        assert_eq!(
            limiter.try_acquire_at(t0()),
            Err(ProviderError::QuotaExhausted { limit: 100 })
        );
    }

    #[test]
    fn test_daily_window_resets_after_24h() {
        let limiter = ProviderRateLimiter::new("free", 1_000, Some(2));
        assert!(limiter.try_acquire_at(t0()).is_ok());
        assert!(limiter.try_acquire_at(t0() + Duration::hours(1)).is_ok());
        assert!(limiter.try_acquire_at(t0() + Duration::hours(23)).is_err());

        let next_day = t0() + Duration::hours(24);
        assert_eq!(limiter.daily_remaining_at(next_day), Some(2));
        assert!(limiter.try_acquire_at(next_day).is_ok());
    }

    #[test]
    fn test_rate_limited_attempt_does_not_spend_quota() {
        let limiter = ProviderRateLimiter::new("free", 1, Some(10));
        assert!(limiter.try_acquire_at(t0()).is_ok());
        assert!(matches!(
            limiter.try_acquire_at(t0()),
            Err(ProviderError::RateLimited { .. })
        ));
        assert_eq!(limiter.daily_remaining_at(t0()), Some(9));
    }

    #[test]
    fn test_no_quota_reports_no_headroom() {
        let limiter = ProviderRateLimiter::new("paid", 5, None);
        assert_eq!(limiter.daily_remaining(), None);
        assert_eq!(limiter.daily_quota(), None);
        assert_eq!(limiter.provider_id(), "paid");
    }
}
