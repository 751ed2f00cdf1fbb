//! Wiring shared by the commands: configuration, providers and the pipeline.

use anyhow::{Context, Result};
use arbys_arbitrage::{FetchOrchestrator, ScanPipeline};
use arbys_core::{AppConfig, ConfigLoader};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Loads and validates configuration from `path` plus `ARBYS_` environment overrides.
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let config = ConfigLoader::load_from(path)
        .with_context(|| format!("loading configuration from {}", path.display()))?;
    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// Builds every configured provider and wires the scan pipeline.
pub fn build_pipeline(config: &AppConfig) -> Result<ScanPipeline> {
    let mut orchestrator = FetchOrchestrator::from_config(&config.fetch);
    for configured in arbys_providers::build_providers(config)? {
        orchestrator.register(configured.provider, &configured.config);
    }
    Ok(ScanPipeline::from_config(Arc::new(orchestrator), config))
}

/// Token cancelled on the first Ctrl-C.
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Ctrl-C received, shutting down");
                trigger.cancel();
            }
            Err(e) => tracing::warn!(error = %e, "Failed to listen for Ctrl-C"),
        }
    });
    token
}
