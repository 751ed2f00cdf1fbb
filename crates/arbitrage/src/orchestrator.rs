//! Concurrent fetch across all configured providers.
//!
//! [`FetchOrchestrator::fetch_all`] launches one task per enabled provider and
//! fans the results back in. Each task is bounded by its provider's own
//! timeout and retry policy and by the provider's rate limiter; the cycle as
//! a whole is bounded by a global ceiling and by the caller's
//! [`CancellationToken`]. A failing provider only ever contributes an entry
//! to [`FetchSnapshot::errors`].

use crate::rate_limiter::ProviderRateLimiter;
use arbys_core::{FetchConfig, Offer, OddsProvider, ProviderConfig, ProviderError};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Longest delay between two attempts of the same provider.
const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Structural failures that prevent a fetch cycle from running at all.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("no enabled providers configured")]
    NoProvidersConfigured,
}

// =============================================================================
// Policy
// =============================================================================

/// Timeout and retry policy for one provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchPolicy {
    pub enabled: bool,
    /// Deadline for each attempt.
    pub timeout: Duration,
    pub max_retries: u32,
    /// Delay before the first retry; doubles after each failed attempt.
    pub backoff: Duration,
}

impl FetchPolicy {
    /// Delay before retry number `attempt` (zero-based), never longer than
    /// one attempt's deadline.
    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff
            .saturating_mul(1u32 << attempt.min(16))
            .min(MAX_BACKOFF)
            .min(self.timeout)
    }

    /// Wall-clock limit for all attempts and the delays between them.
    #[must_use]
    pub fn budget(&self) -> Duration {
        self.timeout.saturating_mul(self.max_retries.saturating_add(1))
    }
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self::from(&ProviderConfig::default())
    }
}

impl From<&ProviderConfig> for FetchPolicy {
    fn from(config: &ProviderConfig) -> Self {
        Self {
            enabled: config.enabled,
            timeout: Duration::from_millis(config.timeout_ms),
            max_retries: config.max_retries,
            backoff: Duration::from_millis(config.backoff_ms),
        }
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// A provider that failed during a cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderFailure {
    pub provider: String,
    pub error: ProviderError,
    pub at: DateTime<Utc>,
}

/// Per-provider timing for one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProviderLatency {
    pub elapsed_ms: u64,
    pub success: bool,
    pub offer_count: usize,
}

/// Partial-success result of one fetch cycle.
#[derive(Debug, Clone)]
pub struct FetchSnapshot {
    pub sport: String,
    /// Offers from every provider that succeeded.
    pub offers: Vec<Offer>,
    /// One entry per provider that failed, timed out or was cancelled.
    pub errors: Vec<ProviderFailure>,
    pub latency: BTreeMap<String, ProviderLatency>,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl FetchSnapshot {
    /// Ids of providers that returned successfully.
    pub fn succeeded(&self) -> Vec<&str> {
        self.latency
            .iter()
            .filter(|(_, l)| l.success)
            .map(|(id, _)| id.as_str())
            .collect()
    }

    pub fn error_for(&self, provider: &str) -> Option<&ProviderError> {
        self.errors
            .iter()
            .find(|f| f.provider == provider)
            .map(|f| &f.error)
    }
}

// =============================================================================
// Provider health
// =============================================================================

/// Coarse provider condition derived from recent success/error counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderCondition {
    Healthy,
    Degraded,
    Down,
}

/// Running success/error statistics for a provider.
#[derive(Debug, Clone, Default)]
pub struct ProviderHealth {
    pub success_count: u64,
    pub error_count: u64,
    total_response_ms: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<(String, DateTime<Utc>)>,
}

impl ProviderHealth {
    fn record_success(&mut self, elapsed_ms: u64, at: DateTime<Utc>) {
        self.success_count += 1;
        self.total_response_ms += elapsed_ms;
        self.last_success = Some(at);
    }

    fn record_failure(&mut self, elapsed_ms: u64, error: &ProviderError, at: DateTime<Utc>) {
        self.error_count += 1;
        self.total_response_ms += elapsed_ms;
        self.last_error = Some((error.to_string(), at));
    }

    /// Mean response time over all recorded attempts.
    pub fn avg_response_ms(&self) -> Option<u64> {
        let total = self.success_count + self.error_count;
        (total > 0).then(|| self.total_response_ms / total)
    }

    /// Down above 50% errors, degraded above 20%.
    pub fn condition(&self) -> ProviderCondition {
        let total = self.success_count + self.error_count;
        if total == 0 {
            return ProviderCondition::Healthy;
        }
        let error_rate = self.error_count as f64 / total as f64;
        if error_rate > 0.5 {
            ProviderCondition::Down
        } else if error_rate > 0.2 {
            ProviderCondition::Degraded
        } else {
            ProviderCondition::Healthy
        }
    }
}

/// Point-in-time status of one provider for the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub id: String,
    pub enabled: bool,
    pub status: ProviderCondition,
    pub success_count: u64,
    pub error_count: u64,
    pub avg_response_ms: Option<u64>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub daily_quota: Option<u32>,
    pub daily_quota_remaining: Option<u32>,
}

// =============================================================================
// Orchestrator
// =============================================================================

struct ProviderSlot {
    provider: Arc<dyn OddsProvider>,
    policy: FetchPolicy,
    limiter: Arc<ProviderRateLimiter>,
}

/// Result a fetch task sends back to the fan-in loop.
struct TaskReport {
    provider: String,
    result: Result<Vec<Offer>, ProviderError>,
    elapsed_ms: u64,
}

/// Fans out one fetch per enabled provider and fans the results back in.
pub struct FetchOrchestrator {
    slots: Vec<ProviderSlot>,
    global_timeout: Duration,
    health: RwLock<HashMap<String, ProviderHealth>>,
}

impl FetchOrchestrator {
    pub fn new(global_timeout: Duration) -> Self {
        Self {
            slots: Vec::new(),
            global_timeout,
            health: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &FetchConfig) -> Self {
        Self::new(Duration::from_millis(config.global_timeout_ms))
    }

    /// Registers a provider with the policy and limiter described by `config`.
    pub fn register(&mut self, provider: Arc<dyn OddsProvider>, config: &ProviderConfig) {
        let limiter = Arc::new(ProviderRateLimiter::new(
            provider.id(),
            config.requests_per_second,
            config.daily_quota,
        ));
        self.register_with(provider, FetchPolicy::from(config), limiter);
    }

    /// Registers a provider with an explicit policy and limiter.
    pub fn register_with(
        &mut self,
        provider: Arc<dyn OddsProvider>,
        policy: FetchPolicy,
        limiter: Arc<ProviderRateLimiter>,
    ) {
        info!(
            provider = %provider.id(),
            enabled = policy.enabled,
            timeout_ms = policy.timeout.as_millis() as u64,
            max_retries = policy.max_retries,
            "Registered provider"
        );
        self.slots.push(ProviderSlot {
            provider,
            policy,
            limiter,
        });
    }

    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn OddsProvider>, config: &ProviderConfig) -> Self {
        self.register(provider, config);
        self
    }

    pub fn enabled_providers(&self) -> Vec<&str> {
        self.slots
            .iter()
            .filter(|s| s.policy.enabled)
            .map(|s| s.provider.id())
            .collect()
    }

    pub fn global_timeout(&self) -> Duration {
        self.global_timeout
    }

    /// Fetches `sport` from every enabled provider concurrently.
    ///
    /// Returns when every provider has reported, the global ceiling elapses or
    /// `cancel` fires, whichever comes first. Providers still pending at that
    /// point are recorded as timeout (or cancelled) errors.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::NoProvidersConfigured`] if no provider is enabled.
    pub async fn fetch_all(
        &self,
        sport: &str,
        cancel: &CancellationToken,
    ) -> Result<FetchSnapshot, FetchError> {
        let active: Vec<&ProviderSlot> = self.slots.iter().filter(|s| s.policy.enabled).collect();
        if active.is_empty() {
            return Err(FetchError::NoProvidersConfigured);
        }

        let started_at = Utc::now();
        let started = Instant::now();
        let cycle = cancel.child_token();
        let (tx, mut rx) = mpsc::channel::<TaskReport>(active.len());
        let mut tasks = JoinSet::new();
        let mut pending: BTreeSet<String> = BTreeSet::new();

        for slot in active {
            let id = slot.provider.id().to_string();
            pending.insert(id.clone());

            let provider = Arc::clone(&slot.provider);
            let limiter = Arc::clone(&slot.limiter);
            let policy = slot.policy.clone();
            let sport = sport.to_string();
            let token = cycle.clone();
            let tx = tx.clone();

            tasks.spawn(async move {
                let attempt_started = Instant::now();
                let result = fetch_with_policy(provider.as_ref(), &limiter, &policy, &sport, &token).await;
                let report = TaskReport {
                    provider: id,
                    result,
                    elapsed_ms: attempt_started.elapsed().as_millis() as u64,
                };
                // Receiver gone means the cycle already ended.
                let _ = tx.send(report).await;
            });
        }
        drop(tx);

        let mut offers = Vec::new();
        let mut errors = Vec::new();
        let mut latency = BTreeMap::new();

        let ceiling = tokio::time::sleep(self.global_timeout);
        tokio::pin!(ceiling);

        let unfinished: Option<ProviderError> = loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break Some(ProviderError::Cancelled),
                () = &mut ceiling => break Some(ProviderError::timeout(format!(
                    "global ceiling of {}ms elapsed",
                    self.global_timeout.as_millis()
                ))),
                report = rx.recv() => {
                    let Some(report) = report else {
                        break None;
                    };
                    pending.remove(&report.provider);
                    let now = Utc::now();
                    match report.result {
                        Ok(mut batch) => {
                            for offer in &mut batch {
                                offer.source_id.clone_from(&report.provider);
                            }
                            debug!(
                                provider = %report.provider,
                                offers = batch.len(),
                                elapsed_ms = report.elapsed_ms,
                                "Provider fetch succeeded"
                            );
                            self.health
                                .write()
                                .entry(report.provider.clone())
                                .or_default()
                                .record_success(report.elapsed_ms, now);
                            latency.insert(report.provider, ProviderLatency {
                                elapsed_ms: report.elapsed_ms,
                                success: true,
                                offer_count: batch.len(),
                            });
                            offers.extend(batch);
                        }
                        Err(error) => {
                            warn!(
                                provider = %report.provider,
                                error = %error,
                                elapsed_ms = report.elapsed_ms,
                                "Provider fetch failed"
                            );
                            self.record_failure(&mut errors, &mut latency, report.provider, error, report.elapsed_ms, now);
                        }
                    }
                }
            }
        };

        cycle.cancel();
        tasks.abort_all();

        let now = Utc::now();
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let leftover = unfinished.unwrap_or_else(|| {
            ProviderError::Internal("fetch task ended without a result".to_string())
        });
        for provider in pending {
            warn!(provider = %provider, error = %leftover, "Provider did not finish");
            self.record_failure(&mut errors, &mut latency, provider, leftover.clone(), elapsed_ms, now);
        }

        errors.sort_by(|a, b| a.provider.cmp(&b.provider));

        info!(
            sport,
            offers = offers.len(),
            failed = errors.len(),
            elapsed_ms,
            "Fetch cycle complete"
        );

        Ok(FetchSnapshot {
            sport: sport.to_string(),
            offers,
            errors,
            latency,
            started_at,
            elapsed_ms,
        })
    }

    fn record_failure(
        &self,
        errors: &mut Vec<ProviderFailure>,
        latency: &mut BTreeMap<String, ProviderLatency>,
        provider: String,
        error: ProviderError,
        elapsed_ms: u64,
        at: DateTime<Utc>,
    ) {
        self.health
            .write()
            .entry(provider.clone())
            .or_default()
            .record_failure(elapsed_ms, &error, at);
        latency.insert(
            provider.clone(),
            ProviderLatency {
                elapsed_ms,
                success: false,
                offer_count: 0,
            },
        );
        errors.push(ProviderFailure { provider, error, at });
    }

    /// Status of every registered provider, enabled or not.
    pub fn provider_status(&self) -> Vec<ProviderStatus> {
        let health = self.health.read();
        self.slots
            .iter()
            .map(|slot| {
                let id = slot.provider.id();
                let stats = health.get(id).cloned().unwrap_or_default();
                let (last_error, last_error_at) = match stats.last_error.clone() {
                    Some((message, at)) => (Some(message), Some(at)),
                    None => (None, None),
                };
                ProviderStatus {
                    id: id.to_string(),
                    enabled: slot.policy.enabled,
                    status: stats.condition(),
                    success_count: stats.success_count,
                    error_count: stats.error_count,
                    avg_response_ms: stats.avg_response_ms(),
                    last_success: stats.last_success,
                    last_error,
                    last_error_at,
                    daily_quota: slot.limiter.daily_quota(),
                    daily_quota_remaining: slot.limiter.daily_remaining(),
                }
            })
            .collect()
    }
}

impl std::fmt::Debug for FetchOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchOrchestrator")
            .field("providers", &self.slots.iter().map(|s| s.provider.id()).collect::<Vec<_>>())
            .field("global_timeout", &self.global_timeout)
            .finish_non_exhaustive()
    }
}

/// Runs one provider's attempts under its policy.
///
/// Each attempt first takes rate-limit capacity, then races the provider
/// call against the attempt deadline and the cancellation token.
async fn fetch_with_policy(
    provider: &dyn OddsProvider,
    limiter: &ProviderRateLimiter,
    policy: &FetchPolicy,
    sport: &str,
    cancel: &CancellationToken,
) -> Result<Vec<Offer>, ProviderError> {
    let budget = policy.budget();
    match tokio::time::timeout(budget, fetch_with_retries(provider, limiter, policy, sport, cancel)).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::timeout(format!(
            "retries exceeded the {}ms budget",
            budget.as_millis()
        ))),
    }
}

async fn fetch_with_retries(
    provider: &dyn OddsProvider,
    limiter: &ProviderRateLimiter,
    policy: &FetchPolicy,
    sport: &str,
    cancel: &CancellationToken,
) -> Result<Vec<Offer>, ProviderError> {
    let mut attempt = 0u32;
    loop {
        limiter.try_acquire()?;

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ProviderError::Cancelled),
            outcome = tokio::time::timeout(policy.timeout, provider.fetch(sport)) => match outcome {
                Ok(result) => result,
                Err(_) => Err(ProviderError::timeout(format!(
                    "no response within {}ms",
                    policy.timeout.as_millis()
                ))),
            },
        };

        match result {
            Ok(offers) => return Ok(offers),
            Err(error) if error.is_retryable() && attempt < policy.max_retries => {
                let delay = policy.backoff_for(attempt);
                debug!(
                    provider = %provider.id(),
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Retrying provider fetch"
                );
                attempt += 1;
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(ProviderError::Cancelled),
                    () = tokio::time::sleep(delay) => {}
                }
            }
            Err(error) => return Err(error),
        }
    }
}
