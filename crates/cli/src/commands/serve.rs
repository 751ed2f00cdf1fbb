//! Runs the HTTP API until Ctrl-C.

use crate::runtime;
use anyhow::Result;
use arbys_core::config_loader::DEFAULT_CONFIG_PATH;
use arbys_web_api::{ApiServer, AppState};
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;

/// Arguments for the serve command.
#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Config file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Server address; overrides `server.host`/`server.port`
    #[arg(short, long)]
    pub addr: Option<String>,
}

/// Runs the serve command.
///
/// # Errors
/// Returns an error if configuration is invalid, a provider cannot be built
/// or the server cannot bind.
pub async fn run_serve(args: ServeArgs) -> Result<()> {
    let config = runtime::load_config(&args.config)?;
    let addr = args.addr.unwrap_or_else(|| config.server.addr());

    tracing::info!(
        config = %args.config.display(),
        providers = config.enabled_providers().count(),
        addr = %addr,
        "Starting arbitrage API"
    );

    let pipeline = Arc::new(runtime::build_pipeline(&config)?);
    let state = AppState::new(pipeline, &config.fetch).with_shutdown(runtime::cancel_on_ctrl_c());

    ApiServer::new(state).serve(&addr).await
}
