use arbys_arbitrage::ScanPipeline;
use arbys_core::FetchConfig;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Shared state behind every handler.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<ScanPipeline>,
    pub default_sport: String,
    pub started_at: DateTime<Utc>,
    /// Cancelled on server shutdown; each request fetches under a child token.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(pipeline: Arc<ScanPipeline>, fetch: &FetchConfig) -> Self {
        Self {
            pipeline,
            default_sport: fetch.default_sport.clone(),
            started_at: Utc::now(),
            shutdown: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("default_sport", &self.default_sport)
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}
