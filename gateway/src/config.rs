//! Configuration for the gateway.

use config::{Config as ConfigLoader, ConfigError, Environment, File};
use fininfer_common::Operation;
use serde::Deserialize;

use crate::balancer::SelectionStrategy;
use crate::batching::BatchStrategy;

/// Main configuration structure for the gateway.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub batching: BatchingConfig,
    #[serde(default)]
    pub balancer: BalancerConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub loadtest: LoadTestConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Key-value store connection. Without a Redis URL an in-process store is used.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct StoreConfig {
    #[serde(default)]
    pub redis_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Coalescing window for the cache's batch-compatible compute path.
    #[serde(default = "default_cache_batch_window")]
    pub batch_window_ms: u64,
    #[serde(default)]
    pub warmer_enabled: bool,
    #[serde(default = "default_warmer_interval")]
    pub warmer_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            batch_window_ms: default_cache_batch_window(),
            warmer_enabled: false,
            warmer_interval_secs: default_warmer_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchingConfig {
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    #[serde(default = "default_base_wait")]
    pub base_wait_ms: u64,
    #[serde(default)]
    pub strategy: BatchStrategy,
    /// Group requests by normalized feature subset. When off, the key is the operation alone.
    #[serde(default = "default_true")]
    pub compatibility_check: bool,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            base_wait_ms: default_base_wait(),
            strategy: BatchStrategy::default(),
            compatibility_check: true,
        }
    }
}

/// A statically configured model endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    pub id: String,
    pub address: String,
    #[serde(default = "default_capacity")]
    pub capacity: u32,
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// Pool label, e.g. `general`, `coordinator` or a specialist agent name.
    #[serde(default = "default_pool")]
    pub pool: String,
    /// Operations served. Empty means all.
    #[serde(default)]
    pub operations: Vec<Operation>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BalancerConfig {
    #[serde(default)]
    pub strategy: SelectionStrategy,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_breaker_timeout")]
    pub breaker_timeout_secs: u64,
    #[serde(default = "default_health_interval")]
    pub health_check_interval_secs: u64,
    /// Also probe `GET {address}/health` during health checks.
    #[serde(default)]
    pub active_probe: bool,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            strategy: SelectionStrategy::default(),
            failure_threshold: default_failure_threshold(),
            breaker_timeout_secs: default_breaker_timeout(),
            health_check_interval_secs: default_health_interval(),
            active_probe: false,
            probe_timeout_ms: default_probe_timeout(),
            endpoints: vec![],
        }
    }
}

/// Which path batch-enabled requests take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchPath {
    /// Size/time/priority triggered request batcher.
    #[default]
    Batcher,
    /// The cache's pattern-coalescing compute path.
    CacheCoalesce,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_complexity_threshold")]
    pub complexity_threshold: f64,
    /// Fraction of users routed to the A/B variant.
    #[serde(default = "default_ab_fraction")]
    pub ab_test_fraction: f64,
    #[serde(default = "default_context_ttl")]
    pub context_ttl_secs: u64,
    #[serde(default = "default_context_history")]
    pub context_history: usize,
    #[serde(default)]
    pub batch_path: BatchPath,
    #[serde(default = "default_sampler_interval")]
    pub sampler_interval_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            complexity_threshold: default_complexity_threshold(),
            ab_test_fraction: default_ab_fraction(),
            context_ttl_secs: default_context_ttl(),
            context_history: default_context_history(),
            batch_path: BatchPath::default(),
            sampler_interval_secs: default_sampler_interval(),
        }
    }
}

/// Outbound model client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelClientKind {
    /// In-process simulated endpoints.
    #[default]
    Simulated,
    /// JSON over HTTP to each endpoint's address.
    Http,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub client: ModelClientKind,
    #[serde(default = "default_model_timeout")]
    pub request_timeout_ms: u64,
    /// Failure probability injected by the simulated client.
    #[serde(default)]
    pub simulated_failure_rate: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            client: ModelClientKind::default(),
            request_timeout_ms: default_model_timeout(),
            simulated_failure_rate: 0.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    #[serde(default = "default_window_minutes")]
    pub window_minutes: u64,
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
    #[serde(default = "default_evaluation_interval")]
    pub evaluation_interval_secs: u64,
    #[serde(default = "default_history_size")]
    pub history_size: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            window_minutes: default_window_minutes(),
            min_samples: default_min_samples(),
            evaluation_interval_secs: default_evaluation_interval(),
            history_size: default_history_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// In-process load-test driver run by `fininfer-gateway loadtest`.
#[derive(Debug, Clone, Deserialize)]
pub struct LoadTestConfig {
    #[serde(default = "default_loadtest_users")]
    pub concurrent_users: usize,
    #[serde(default = "default_requests_per_user")]
    pub requests_per_user: usize,
    /// Spread user start times over this window.
    #[serde(default = "default_ramp_up")]
    pub ramp_up_ms: u64,
    /// Pause between requests of one user.
    #[serde(default = "default_think_time")]
    pub think_time_ms: u64,
    #[serde(default = "default_loadtest_operations")]
    pub operations: Vec<Operation>,
    #[serde(default = "default_target_p95")]
    pub target_p95_ms: f64,
    #[serde(default = "default_target_success_rate")]
    pub target_success_rate: f64,
}

impl Default for LoadTestConfig {
    fn default() -> Self {
        Self {
            concurrent_users: default_loadtest_users(),
            requests_per_user: default_requests_per_user(),
            ramp_up_ms: default_ramp_up(),
            think_time_ms: default_think_time(),
            operations: default_loadtest_operations(),
            target_p95_ms: default_target_p95(),
            target_success_rate: default_target_success_rate(),
        }
    }
}

// Default values
fn default_loadtest_users() -> usize {
    100
}
fn default_requests_per_user() -> usize {
    10
}
fn default_ramp_up() -> u64 {
    3000
}
fn default_think_time() -> u64 {
    100
}
fn default_loadtest_operations() -> Vec<Operation> {
    vec![
        Operation::BudgetOptimization,
        Operation::PortfolioAnalysis,
        Operation::FinancialAnalysis,
        Operation::MarketIntelligence,
    ]
}
fn default_target_p95() -> f64 {
    400.0
}
fn default_target_success_rate() -> f64 {
    0.99
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8090
}
fn default_cache_batch_window() -> u64 {
    50
}
fn default_warmer_interval() -> u64 {
    300
}
fn default_max_batch_size() -> usize {
    32
}
fn default_base_wait() -> u64 {
    50
}
fn default_true() -> bool {
    true
}
fn default_capacity() -> u32 {
    100
}
fn default_weight() -> f64 {
    1.0
}
fn default_pool() -> String {
    "general".to_string()
}
fn default_failure_threshold() -> u32 {
    5
}
fn default_breaker_timeout() -> u64 {
    60
}
fn default_health_interval() -> u64 {
    30
}
fn default_probe_timeout() -> u64 {
    1000
}
fn default_complexity_threshold() -> f64 {
    0.8
}
fn default_ab_fraction() -> f64 {
    0.2
}
fn default_context_ttl() -> u64 {
    3600
}
fn default_context_history() -> usize {
    10
}
fn default_sampler_interval() -> u64 {
    5
}
fn default_model_timeout() -> u64 {
    5000
}
fn default_buffer_size() -> usize {
    1000
}
fn default_window_minutes() -> u64 {
    5
}
fn default_min_samples() -> usize {
    10
}
fn default_evaluation_interval() -> u64 {
    10
}
fn default_history_size() -> usize {
    1000
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from file and environment variables.
    ///
    /// Configuration sources (in order of precedence):
    /// 1. Environment variables (FININFER__SECTION__KEY format)
    /// 2. config.toml file (if present)
    /// 3. Built-in defaults
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration using `path` (extension optional) as the file source.
    pub fn load_from(path: &str) -> Result<Self, ConfigError> {
        let config = ConfigLoader::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port() as i64)?
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("FININFER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 8090);
        assert_eq!(config.batching.max_batch_size, 32);
        assert_eq!(config.batching.base_wait_ms, 50);
        assert_eq!(config.balancer.failure_threshold, 5);
        assert_eq!(config.balancer.breaker_timeout_secs, 60);
        assert_eq!(config.balancer.health_check_interval_secs, 30);
        assert_eq!(config.engine.batch_path, BatchPath::Batcher);
        assert_eq!(config.monitor.buffer_size, 1000);
        assert!(config.store.redis_url.is_none());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[batching]
max_batch_size = 8
strategy = "priority_aware"

[balancer]
strategy = "least_connections"

[[balancer.endpoints]]
id = "ep-1"
address = "http://10.0.0.1:9000"
capacity = 10
operations = ["budget_optimization"]

[engine]
batch_path = "cache_coalesce"
"#
        )
        .unwrap();

        let config = Config::load_from(path.to_str().unwrap()).unwrap();
        assert_eq!(config.batching.max_batch_size, 8);
        assert_eq!(config.batching.strategy, BatchStrategy::PriorityAware);
        assert_eq!(config.balancer.strategy, SelectionStrategy::LeastConnections);
        assert_eq!(config.balancer.endpoints.len(), 1);
        let ep = &config.balancer.endpoints[0];
        assert_eq!(ep.capacity, 10);
        assert_eq!(ep.pool, "general");
        assert_eq!(ep.operations, vec![Operation::BudgetOptimization]);
        assert_eq!(config.engine.batch_path, BatchPath::CacheCoalesce);
        assert_eq!(config.server.host, "0.0.0.0");
    }
}
