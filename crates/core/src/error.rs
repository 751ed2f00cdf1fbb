//! Error types for provider fetches.
//!
//! Every provider failure is isolated to that provider: the orchestrator
//! records it alongside the snapshot and carries on with the others.

use thiserror::Error;

/// Errors a provider adapter (or the orchestrator acting for it) can report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// A fetch did not finish within its deadline.
    #[error("request timeout: {0}")]
    Timeout(String),

    /// No rate-limit capacity right now.
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited {
        /// Seconds to wait before capacity returns.
        retry_after_secs: u64,
    },

    /// The provider's quota for the current window is used up.
    #[error("daily quota of {limit} requests exhausted")]
    QuotaExhausted {
        /// Requests allowed per window.
        limit: u32,
    },

    /// The provider answered with an error status.
    #[error("API error: {status_code} - {message}")]
    Api {
        /// HTTP status code.
        status_code: u16,
        /// Error message from the provider.
        message: String,
    },

    /// Transport failure.
    #[error("network error: {0}")]
    Network(String),

    /// The response could not be decoded.
    #[error("parse error: {0}")]
    Parse(String),

    /// The fetch was cancelled by the caller.
    #[error("fetch cancelled")]
    Cancelled,

    /// Misconfigured adapter (missing API key, unreadable fixture, ...).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The fetch task ended without reporting a result.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ProviderError {
    /// Creates a timeout error.
    pub fn timeout(context: impl Into<String>) -> Self {
        Self::Timeout(context.into())
    }

    /// Creates an API error from status code and message.
    pub fn api(status_code: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status_code,
            message: message.into(),
        }
    }

    /// Creates a rate limit error.
    pub fn rate_limited(retry_after_secs: u64) -> Self {
        Self::RateLimited { retry_after_secs }
    }

    /// Creates a network error.
    pub fn network(context: impl Into<String>) -> Self {
        Self::Network(context.into())
    }

    /// Creates a parse error.
    pub fn parse(context: impl Into<String>) -> Self {
        Self::Parse(context.into())
    }

    /// Returns true if another attempt within the same cycle may succeed.
    ///
    /// Rate-limit and quota errors are never retried: retrying them would
    /// spend capacity the provider has already refused.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Network(_) => true,
            Self::Api { status_code, .. } => *status_code >= 500,
            Self::RateLimited { .. }
            | Self::QuotaExhausted { .. }
            | Self::Parse(_)
            | Self::Cancelled
            | Self::Configuration(_)
            | Self::Internal(_) => false,
        }
    }

    /// Short machine-readable category.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::RateLimited { .. } => "rate_limited",
            Self::QuotaExhausted { .. } => "quota_exhausted",
            Self::Api { .. } => "api",
            Self::Network(_) => "network",
            Self::Parse(_) => "parse",
            Self::Cancelled => "cancelled",
            Self::Configuration(_) => "configuration",
            Self::Internal(_) => "internal",
        }
    }
}
