//! CLI commands for the arbitrage pipeline.

pub mod check_config;
pub mod scan;
pub mod serve;

pub use check_config::{run_check_config, CheckConfigArgs};
pub use scan::{run_scan, ScanArgs};
pub use serve::{run_serve, ServeArgs};
