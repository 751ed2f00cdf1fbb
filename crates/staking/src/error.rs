//! Error types for account health and stake allocation.

use rust_decimal::Decimal;
use thiserror::Error;

/// Health lookup failures surfaced by the cache.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HealthError {
    /// The manager could not compute a snapshot and no entry within the
    /// grace period exists. Callers may retry.
    #[error("health manager unavailable for account {account_id}: {reason}")]
    ManagerUnavailable {
        /// Account whose snapshot was requested.
        account_id: String,
        /// Underlying failure.
        reason: String,
    },
}

impl HealthError {
    pub fn unavailable(account_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ManagerUnavailable {
            account_id: account_id.into(),
            reason: reason.into(),
        }
    }

    /// Every health error is transient from the caller's point of view.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        true
    }
}

/// Request-level allocation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocationError {
    #[error("bankroll must be positive, got {0}")]
    InvalidBankroll(Decimal),

    #[error("max bankroll percentage must be within (0, 100], got {0}")]
    InvalidBankrollPct(Decimal),

    #[error("opportunity {event_id} has fewer than two legs")]
    EmptyOpportunity {
        /// Offending opportunity.
        event_id: String,
    },
}
