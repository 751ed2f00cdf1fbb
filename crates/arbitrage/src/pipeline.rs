//! One fetch-normalize-detect cycle.

use crate::detector::{ArbitrageDetector, DetectionSummary};
use crate::normalizer::{Normalizer, SkippedOffer};
use crate::orchestrator::{FetchError, FetchOrchestrator, FetchSnapshot};
use arbys_core::{AppConfig, Opportunity};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Everything one scan produced.
#[derive(Debug, Clone)]
pub struct ScanReport {
    pub snapshot: FetchSnapshot,
    pub opportunities: Vec<Opportunity>,
    pub skipped: Vec<SkippedOffer>,
    pub summary: DetectionSummary,
    pub min_profit_pct: Decimal,
    pub as_of: DateTime<Utc>,
}

/// Orchestrator, normalizer and detector wired together.
pub struct ScanPipeline {
    orchestrator: Arc<FetchOrchestrator>,
    normalizer: Normalizer,
    detector: ArbitrageDetector,
}

impl ScanPipeline {
    pub fn new(
        orchestrator: Arc<FetchOrchestrator>,
        normalizer: Normalizer,
        detector: ArbitrageDetector,
    ) -> Self {
        Self {
            orchestrator,
            normalizer,
            detector,
        }
    }

    /// Builds the normalizer and detector from configuration.
    pub fn from_config(orchestrator: Arc<FetchOrchestrator>, config: &AppConfig) -> Self {
        Self::new(
            orchestrator,
            Normalizer::new(config.normalizer.clone()),
            ArbitrageDetector::new(config.detector.clone()),
        )
    }

    pub fn orchestrator(&self) -> &Arc<FetchOrchestrator> {
        &self.orchestrator
    }

    pub fn default_min_profit_pct(&self) -> Decimal {
        self.detector.config().min_profit_pct
    }

    /// Fetches `sport` and detects opportunities as of the fetch completion.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] only for structural failures; provider failures
    /// are reported in the snapshot.
    pub async fn scan(
        &self,
        sport: &str,
        min_profit_pct: Decimal,
        cancel: &CancellationToken,
    ) -> Result<ScanReport, FetchError> {
        let snapshot = self.orchestrator.fetch_all(sport, cancel).await?;
        Ok(self.analyze(snapshot, min_profit_pct, Utc::now()))
    }

    /// Normalizes and detects over an already-collected snapshot.
    pub fn analyze(
        &self,
        snapshot: FetchSnapshot,
        min_profit_pct: Decimal,
        as_of: DateTime<Utc>,
    ) -> ScanReport {
        let batch = self.normalizer.normalize(&snapshot.offers, as_of);
        let (opportunities, summary) =
            self.detector
                .detect_with_summary(&batch.events, min_profit_pct, as_of);

        info!(
            sport = %snapshot.sport,
            offers = snapshot.offers.len(),
            events = batch.events.len(),
            skipped = batch.skipped.len(),
            opportunities = opportunities.len(),
            provider_errors = snapshot.errors.len(),
            "Scan complete"
        );

        ScanReport {
            snapshot,
            opportunities,
            skipped: batch.skipped,
            summary,
            min_profit_pct,
            as_of,
        }
    }
}

impl std::fmt::Debug for ScanPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanPipeline")
            .field("orchestrator", &self.orchestrator)
            .field("normalizer", &self.normalizer)
            .finish_non_exhaustive()
    }
}
