pub mod backends;
pub mod balancer;
pub mod batching;
pub mod cache;
pub mod compute;
pub mod config;
pub mod engine;
pub mod error;
pub mod loadtest;
pub mod logging;
pub mod metrics;
pub mod monitor;
pub mod routes;
pub mod store;
pub mod test_util;

pub use config::Config;
pub use engine::Orchestrator;
pub use error::GatewayError;
pub use metrics::GatewayMetrics;

use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub engine: Arc<Orchestrator>,
}
