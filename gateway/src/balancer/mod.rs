//! Endpoint load balancing with circuit breakers and health checks.

mod circuit;
mod endpoint;
mod probe;
mod strategy;

pub use circuit::{CircuitBreaker, CircuitState};
pub use endpoint::{BackendEndpoint, EndpointStats};
pub use probe::{HealthProbe, HttpProbe};
pub use strategy::{resource_score, response_time_score, SelectionStrategy};

use std::ops::Deref;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;

use fininfer_common::Operation;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::{BalancerConfig, EndpointConfig};
use crate::error::GatewayError;
use crate::metrics::GatewayMetrics;

/// Success rate below which the passive health rule marks an endpoint unhealthy.
const MIN_HEALTHY_SUCCESS_RATE: f64 = 0.5;

/// Aggregate balancer view for `/status`.
#[derive(Debug, Clone, Serialize)]
pub struct LoadBalancerStats {
    pub strategy: SelectionStrategy,
    pub total_endpoints: usize,
    pub healthy_endpoints: usize,
    pub total_load: u64,
    pub total_capacity: u64,
    pub overall_load_percentage: f64,
    pub endpoints: Vec<EndpointStats>,
}

/// A slot held on an endpoint for the length of one call.
///
/// Dropping a lease that was never finished releases the slot as a failed call.
pub struct Lease<'a> {
    balancer: &'a LoadBalancer,
    endpoint: Arc<BackendEndpoint>,
    started: Instant,
    finished: bool,
}

impl Lease<'_> {
    /// Release the slot with the call's outcome and return the call latency.
    pub fn finish(&mut self, success: bool) -> Duration {
        let latency = self.started.elapsed();
        if !self.finished {
            self.finished = true;
            self.balancer.release(&self.endpoint, latency, success);
        }
        latency
    }
}

impl std::fmt::Debug for Lease<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("endpoint", &self.endpoint)
            .field("started", &self.started)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl Deref for Lease<'_> {
    type Target = BackendEndpoint;

    fn deref(&self) -> &BackendEndpoint {
        &self.endpoint
    }
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        if !self.finished {
            tracing::debug!("Call on endpoint {} abandoned, releasing its slot", self.endpoint.id);
            self.finish(false);
        }
    }
}

/// Routes calls over registered endpoints.
pub struct LoadBalancer {
    strategy: SelectionStrategy,
    failure_threshold: u32,
    breaker_timeout: Duration,
    health_interval: Duration,
    endpoints: RwLock<Vec<Arc<BackendEndpoint>>>,
    round_robin: AtomicUsize,
    probe: Option<Arc<dyn HealthProbe>>,
    metrics: Arc<GatewayMetrics>,
    health_task: Mutex<Option<JoinHandle<()>>>,
}

impl LoadBalancer {
    /// Create a balancer and register the configured endpoints.
    pub fn new(config: &BalancerConfig, metrics: Arc<GatewayMetrics>) -> Self {
        let balancer = Self {
            strategy: config.strategy,
            failure_threshold: config.failure_threshold,
            breaker_timeout: Duration::from_secs(config.breaker_timeout_secs),
            health_interval: Duration::from_secs(config.health_check_interval_secs.max(1)),
            endpoints: RwLock::new(Vec::new()),
            round_robin: AtomicUsize::new(0),
            probe: None,
            metrics,
            health_task: Mutex::new(None),
        };
        for endpoint in &config.endpoints {
            balancer.register(endpoint);
        }
        balancer
    }

    /// Add an active probe to the health check.
    pub fn with_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn strategy(&self) -> SelectionStrategy {
        self.strategy
    }

    /// Register a general-pool endpoint serving every operation.
    pub fn register_endpoint(
        &self,
        id: &str,
        address: &str,
        capacity: u32,
        weight: f64,
    ) -> Arc<BackendEndpoint> {
        self.register(&EndpointConfig {
            id: id.to_string(),
            address: address.to_string(),
            capacity,
            weight,
            pool: "general".to_string(),
            operations: vec![],
        })
    }

    /// Register an endpoint, replacing any endpoint with the same id.
    pub fn register(&self, config: &EndpointConfig) -> Arc<BackendEndpoint> {
        let breaker = CircuitBreaker::new(self.failure_threshold, self.breaker_timeout);
        let endpoint = Arc::new(BackendEndpoint::new(config, breaker));
        let mut endpoints = self.endpoints.write();
        match endpoints.iter().position(|ep| ep.id == config.id) {
            Some(idx) => endpoints[idx] = Arc::clone(&endpoint),
            None => endpoints.push(Arc::clone(&endpoint)),
        }
        self.metrics.endpoint_load.with_label_values(&[&endpoint.id]).set(0);
        self.metrics.circuit_state.with_label_values(&[&endpoint.id]).set(0);
        tracing::info!(
            "Registered endpoint {} at {} (pool: {}, capacity: {}, weight: {})",
            endpoint.id,
            endpoint.address,
            endpoint.pool,
            endpoint.capacity,
            endpoint.weight
        );
        endpoint
    }

    pub fn unregister(&self, id: &str) -> Option<Arc<BackendEndpoint>> {
        let mut endpoints = self.endpoints.write();
        let idx = endpoints.iter().position(|ep| ep.id == id)?;
        tracing::info!("Unregistered endpoint {}", id);
        Some(endpoints.remove(idx))
    }

    pub fn endpoint(&self, id: &str) -> Option<Arc<BackendEndpoint>> {
        self.endpoints.read().iter().find(|ep| ep.id == id).cloned()
    }

    pub fn endpoints(&self) -> Vec<Arc<BackendEndpoint>> {
        self.endpoints.read().clone()
    }

    /// Endpoints of `pool`, or all endpoints when `pool` is `None`.
    pub fn pool(&self, pool: Option<&str>) -> Vec<Arc<BackendEndpoint>> {
        self.endpoints
            .read()
            .iter()
            .filter(|ep| pool.map_or(true, |p| ep.pool == p))
            .cloned()
            .collect()
    }

    fn candidates(&self, pool: Option<&str>, operation: Option<Operation>) -> Vec<Arc<BackendEndpoint>> {
        self.endpoints
            .read()
            .iter()
            .filter(|ep| pool.map_or(true, |p| ep.pool == p))
            .filter(|ep| ep.is_healthy() && ep.has_capacity() && ep.supports(operation))
            .filter(|ep| ep.breaker.allows_request())
            .cloned()
            .collect()
    }

    /// Select an endpoint across all pools.
    pub fn select(&self, operation: Option<Operation>) -> Option<Arc<BackendEndpoint>> {
        self.select_in(None, operation)
    }

    /// Select an endpoint of one pool.
    pub fn select_in(&self, pool: Option<&str>, operation: Option<Operation>) -> Option<Arc<BackendEndpoint>> {
        let candidates = self.candidates(pool, operation);
        if candidates.is_empty() {
            tracing::warn!(
                "No healthy endpoints available (pool: {}, operation: {:?})",
                pool.unwrap_or("*"),
                operation
            );
            return None;
        }
        let selected = self.strategy.pick(&candidates, &self.round_robin)?;
        tracing::debug!("Selected endpoint {} using {:?}", selected.id, self.strategy);
        Some(selected)
    }

    /// Take a slot on `endpoint`. Refuses at capacity or when its circuit is open.
    pub fn acquire(&self, endpoint: &BackendEndpoint) -> bool {
        if !endpoint.breaker.allows_request() || !endpoint.try_acquire() {
            return false;
        }
        self.metrics
            .endpoint_load
            .with_label_values(&[&endpoint.id])
            .set(endpoint.load() as i64);
        true
    }

    /// Select and acquire in one step.
    ///
    /// A capacity race retries selection once before reporting no endpoint.
    pub fn lease(&self, pool: Option<&str>, operation: Option<Operation>) -> Result<Lease<'_>, GatewayError> {
        let target = || {
            format!(
                "pool '{}'{}",
                pool.unwrap_or("*"),
                operation.map(|op| format!(" ({})", op)).unwrap_or_default()
            )
        };
        for _ in 0..2 {
            let endpoint = self
                .select_in(pool, operation)
                .ok_or_else(|| GatewayError::NoHealthyEndpoint(target()))?;
            if !endpoint.breaker.allows_request() {
                return Err(GatewayError::CircuitOpen {
                    endpoint: endpoint.id.clone(),
                });
            }
            if self.acquire(&endpoint) {
                return Ok(Lease {
                    balancer: self,
                    endpoint,
                    started: Instant::now(),
                    finished: false,
                });
            }
            tracing::debug!("Endpoint {} filled up before acquire, reselecting", endpoint.id);
        }
        Err(GatewayError::NoHealthyEndpoint(target()))
    }

    /// Return a slot and record the call's outcome.
    pub fn release(&self, endpoint: &BackendEndpoint, latency: Duration, success: bool) {
        endpoint.release_slot();
        endpoint.record_outcome(latency, success);

        if success {
            endpoint.breaker.record_success();
        } else if endpoint.breaker.record_failure() {
            tracing::warn!(
                "Circuit breaker opened for endpoint {} after {} failures",
                endpoint.id,
                endpoint.breaker.failures()
            );
        }

        let id = endpoint.id.as_str();
        self.metrics.endpoint_load.with_label_values(&[id]).set(endpoint.load() as i64);
        self.metrics
            .endpoint_requests
            .with_label_values(&[id, if success { "success" } else { "failure" }])
            .inc();
        self.metrics
            .endpoint_response_seconds
            .with_label_values(&[id])
            .observe(latency.as_secs_f64());
        self.metrics
            .circuit_state
            .with_label_values(&[id])
            .set(endpoint.breaker.state().as_gauge());
    }

    /// Run one health pass over every endpoint.
    pub async fn check_health(&self) {
        for endpoint in self.endpoints() {
            let mut healthy = endpoint.has_capacity() && endpoint.success_rate() >= MIN_HEALTHY_SUCCESS_RATE;
            if let Some(probe) = &self.probe {
                let reachable = probe.probe(&endpoint).await;
                if reachable && endpoint.success_rate() < MIN_HEALTHY_SUCCESS_RATE {
                    // A live endpoint gets back into rotation at the minimum rate.
                    endpoint.reset_success_rate(MIN_HEALTHY_SUCCESS_RATE);
                    healthy = endpoint.has_capacity();
                }
                healthy = healthy && reachable;
            }

            let was_healthy = endpoint.is_healthy();
            endpoint.set_healthy(healthy);
            endpoint.mark_checked();
            self.metrics
                .circuit_state
                .with_label_values(&[&endpoint.id])
                .set(endpoint.breaker.state().as_gauge());

            if was_healthy != healthy {
                tracing::info!(
                    "Endpoint {} health changed: {} -> {}",
                    endpoint.id,
                    was_healthy,
                    healthy
                );
            }
        }
    }

    /// Start the periodic health check. Calling twice has no effect.
    pub fn start_health_checks(self: &Arc<Self>) {
        let mut task = self.health_task.lock();
        if task.is_some() {
            return;
        }
        let this = Arc::clone(self);
        *task = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(this.health_interval).await;
                this.check_health().await;
            }
        }));
        tracing::info!("Started endpoint health checks every {:?}", self.health_interval);
    }

    pub fn stop_health_checks(&self) {
        if let Some(task) = self.health_task.lock().take() {
            task.abort();
            tracing::info!("Stopped endpoint health checks");
        }
    }

    pub fn stats(&self) -> LoadBalancerStats {
        let endpoints: Vec<EndpointStats> = self.endpoints.read().iter().map(|ep| ep.stats()).collect();
        let total_load: u64 = endpoints.iter().map(|ep| ep.current_load as u64).sum();
        let total_capacity: u64 = endpoints.iter().map(|ep| ep.capacity as u64).sum();
        LoadBalancerStats {
            strategy: self.strategy,
            total_endpoints: endpoints.len(),
            healthy_endpoints: endpoints.iter().filter(|ep| ep.is_healthy).count(),
            total_load,
            total_capacity,
            overall_load_percentage: if total_capacity == 0 {
                0.0
            } else {
                total_load as f64 / total_capacity as f64 * 100.0
            },
            endpoints,
        }
    }
}
