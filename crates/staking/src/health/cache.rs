//! TTL cache in front of the account health manager.
//!
//! Readers share a `parking_lot::RwLock` over the entries. Recomputation is
//! serialized per account through an async gate, so concurrent misses on
//! the same account trigger one manager call and every waiter gets its
//! result. An entry older than the TTL is never served as a hit; it is only
//! returned, flagged [`LookupSource::Stale`], when recomputation fails and
//! the entry is still within the grace period.

use super::{HealthProvider, HealthSnapshot};
use crate::error::HealthError;
use arbys_core::HealthConfig;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// How a lookup was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LookupSource {
    /// Fresh entry already in the cache.
    Cached,
    /// The manager was called for this lookup.
    Computed,
    /// Manager failed; last-known entry within the grace period.
    Stale,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HealthLookup {
    pub snapshot: HealthSnapshot,
    pub source: LookupSource,
}

impl HealthLookup {
    /// True when the snapshot came from a fresh cache entry.
    pub fn found(&self) -> bool {
        self.source == LookupSource::Cached
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Lookups answered from a fresh entry without waiting.
    pub hits: u64,
    /// Lookups answered by another caller's in-flight recompute.
    pub coalesced: u64,
    /// Lookups that called the manager.
    pub misses: u64,
    /// Entries physically resident, expired ones included.
    pub size: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WarmReport {
    pub warmed: Vec<String>,
    pub failed: Vec<String>,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    snapshot: HealthSnapshot,
    stored_at: Instant,
}

/// Entries plus the invalidation counters a recompute is checked against
/// before it stores its result.
#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    /// Bumped by `invalidate`; holds only keys invalidated at least once.
    generations: HashMap<String, u64>,
    /// Bumped by `invalidate_all`.
    epoch: u64,
}

impl CacheState {
    fn version(&self, account_id: &str) -> (u64, u64) {
        (
            self.epoch,
            self.generations.get(account_id).copied().unwrap_or(0),
        )
    }
}

pub struct AccountHealthCache {
    source: Arc<dyn HealthProvider>,
    ttl: Duration,
    grace: Duration,
    state: RwLock<CacheState>,
    gates: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    hits: AtomicU64,
    coalesced: AtomicU64,
    misses: AtomicU64,
}

impl AccountHealthCache {
    pub fn new(source: Arc<dyn HealthProvider>, config: &HealthConfig) -> Self {
        Self {
            source,
            ttl: Duration::from_secs(config.ttl_secs),
            grace: Duration::from_secs(config.grace_secs),
            state: RwLock::new(CacheState::default()),
            gates: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn fresh(&self, account_id: &str) -> Option<HealthSnapshot> {
        let state = self.state.read();
        let entry = state.entries.get(account_id)?;
        (entry.stored_at.elapsed() < self.ttl).then(|| entry.snapshot.clone())
    }

    fn within_grace(&self, account_id: &str) -> Option<HealthSnapshot> {
        let state = self.state.read();
        let entry = state.entries.get(account_id)?;
        (entry.stored_at.elapsed() < self.ttl + self.grace).then(|| entry.snapshot.clone())
    }

    fn gate(&self, account_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut gates = self.gates.lock();
        Arc::clone(gates.entry(account_id.to_string()).or_default())
    }

    /// Drops the account's gate once no other caller holds or awaits it.
    fn release_gate(&self, account_id: &str, gate: Arc<tokio::sync::Mutex<()>>) {
        let mut gates = self.gates.lock();
        let idle = gates
            .get(account_id)
            .is_some_and(|current| Arc::ptr_eq(current, &gate) && Arc::strong_count(&gate) == 2);
        if idle {
            gates.remove(account_id);
        }
    }

    /// Returns the fresh snapshot if one is cached; never computes.
    pub fn peek(&self, account_id: &str) -> Option<HealthSnapshot> {
        self.fresh(account_id)
    }

    /// Looks up an account, recomputing through the manager on a miss.
    ///
    /// A recompute that overlaps an [`invalidate`](Self::invalidate) of the
    /// same account (or an [`invalidate_all`](Self::invalidate_all)) is
    /// returned to its caller but not stored.
    ///
    /// # Errors
    ///
    /// Returns [`HealthError::ManagerUnavailable`] if the manager fails and no
    /// entry within the grace period exists.
    pub async fn get(&self, account_id: &str) -> Result<HealthLookup, HealthError> {
        if let Some(snapshot) = self.fresh(account_id) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(HealthLookup {
                snapshot,
                source: LookupSource::Cached,
            });
        }

        let gate = self.gate(account_id);
        let result = {
            let _guard = gate.lock().await;
            self.lookup_exclusive(account_id).await
        };
        self.release_gate(account_id, gate);
        result
    }

    /// Miss path; the caller holds the account's gate.
    async fn lookup_exclusive(&self, account_id: &str) -> Result<HealthLookup, HealthError> {
        // Another waiter may have recomputed while we queued.
        if let Some(snapshot) = self.fresh(account_id) {
            self.coalesced.fetch_add(1, Ordering::Relaxed);
            return Ok(HealthLookup {
                snapshot,
                source: LookupSource::Cached,
            });
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let version = self.state.read().version(account_id);
        match self.source.snapshot(account_id).await {
            Ok(snapshot) => {
                let mut state = self.state.write();
                if state.version(account_id) == version {
                    state.entries.insert(
                        account_id.to_string(),
                        CacheEntry {
                            snapshot: snapshot.clone(),
                            stored_at: Instant::now(),
                        },
                    );
                    debug!(account_id, stealth_score = snapshot.stealth_score, "Cached account health");
                } else {
                    debug!(account_id, "Invalidated during recompute, not caching");
                }
                Ok(HealthLookup {
                    snapshot,
                    source: LookupSource::Computed,
                })
            }
            Err(error) => {
                if let Some(snapshot) = self.within_grace(account_id) {
                    warn!(account_id, error = %error, "Health recompute failed, serving last-known snapshot");
                    return Ok(HealthLookup {
                        snapshot,
                        source: LookupSource::Stale,
                    });
                }
                warn!(account_id, error = %error, "Health recompute failed");
                Err(HealthError::unavailable(account_id, error.to_string()))
            }
        }
    }

    /// Drops the account's entry and discards any recompute already running.
    pub fn invalidate(&self, account_id: &str) {
        let mut state = self.state.write();
        state.entries.remove(account_id);
        *state.generations.entry(account_id.to_string()).or_default() += 1;
    }

    pub fn invalidate_all(&self) {
        let mut state = self.state.write();
        state.entries.clear();
        state.generations.clear();
        state.epoch += 1;
    }

    /// Computes snapshots for `account_ids` concurrently.
    pub async fn warm_all<S: AsRef<str>>(&self, account_ids: &[S]) -> WarmReport {
        let lookups = account_ids.iter().map(|id| async move {
            let id = id.as_ref();
            (id.to_string(), self.get(id).await.is_ok())
        });

        let mut report = WarmReport::default();
        for (id, ok) in join_all(lookups).await {
            if ok {
                report.warmed.push(id);
            } else {
                report.failed.push(id);
            }
        }
        report
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size: self.state.read().entries.len(),
        }
    }
}

impl std::fmt::Debug for AccountHealthCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountHealthCache")
            .field("ttl", &self.ttl)
            .field("grace", &self.grace)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
