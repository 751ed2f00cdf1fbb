//! Multi-provider odds fetching and arbitrage detection.
//!
//! Data flows strictly forward:
//!
//! 1. [`FetchOrchestrator`] fetches every enabled provider concurrently and
//!    returns a partial-success [`FetchSnapshot`].
//! 2. [`Normalizer`] groups raw offers into canonical events.
//! 3. [`ArbitrageDetector`] picks the best price per outcome and emits
//!    opportunities above the profit threshold.
//!
//! [`ScanPipeline`] runs the three stages as one cycle.

pub mod detector;
pub mod normalizer;
pub mod orchestrator;
pub mod pipeline;
pub mod rate_limiter;

pub use detector::{best_offer, implied_sum, profit_pct, ArbitrageDetector, DetectionSummary, Evaluation};
pub use normalizer::{NormalizedBatch, Normalizer, SkipReason, SkippedOffer};
pub use orchestrator::{
    FetchError, FetchOrchestrator, FetchPolicy, FetchSnapshot, ProviderCondition, ProviderFailure,
    ProviderHealth, ProviderLatency, ProviderStatus,
};
pub use pipeline::{ScanPipeline, ScanReport};
pub use rate_limiter::ProviderRateLimiter;
