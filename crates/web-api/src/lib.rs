//! HTTP surface for the dashboard: provider health and live opportunities.

pub mod handlers;
pub mod server;
pub mod state;

pub use server::ApiServer;
pub use state::AppState;
