//! Request orchestration: context, backend choice, cache, batching and
//! response assembly.

pub mod context;
pub mod selector;

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fininfer_common::{
    AIRequest, AIResponse, BackendCapabilities, BackendKind, PerformanceMetrics, ProcessingTime,
};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub use context::ContextManager;
pub use selector::{ab_variant, complexity, operation_weight, BackendSelector};

use crate::backends::BackendDispatch;
use crate::balancer::{LoadBalancer, LoadBalancerStats};
use crate::batching::{BatchStats, RequestBatcher};
use crate::cache::{CacheStats, CacheWarmer, InferenceCache};
use crate::compute::{BatchCompute, ComputeRequest, ComputeResult};
use crate::config::{BatchPath, Config, EngineConfig};
use crate::error::GatewayError;
use crate::metrics::GatewayMetrics;
use crate::monitor::{MetricType, MonitorStatus, PerformanceMonitor};
use crate::store::KvStore;

#[derive(Debug, Clone, Serialize)]
pub struct BackendStatus {
    pub backend: BackendKind,
    pub healthy: bool,
    pub capabilities: BackendCapabilities,
    pub metrics: PerformanceMetrics,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub uptime_seconds: u64,
    pub active_requests: i64,
    pub performance_grade: &'static str,
    pub services_running: bool,
    pub cache: CacheStats,
    pub batching: BatchStats,
    pub load_balancer: LoadBalancerStats,
    pub monitor: MonitorStatus,
    pub backends: Vec<BackendStatus>,
}

/// Counts one request as in flight until dropped.
struct InFlight<'a> {
    engine: &'a Orchestrator,
}

impl<'a> InFlight<'a> {
    fn enter(engine: &'a Orchestrator) -> Self {
        engine.active.fetch_add(1, Ordering::Relaxed);
        engine.metrics.active_requests.inc();
        Self { engine }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.engine.metrics.active_requests.dec();
        self.engine.active.fetch_sub(1, Ordering::Relaxed);
    }
}

struct Served {
    result: ComputeResult,
    cache_hit: bool,
}

/// Per-request entry point of the gateway.
///
/// `process` never fails: errors come back as `AIResponse { success: false }`.
pub struct Orchestrator {
    config: EngineConfig,
    cache: InferenceCache,
    batcher: RequestBatcher,
    balancer: Arc<LoadBalancer>,
    dispatch: Arc<BackendDispatch>,
    monitor: Arc<PerformanceMonitor>,
    metrics: Arc<GatewayMetrics>,
    context: ContextManager,
    selector: BackendSelector,
    warmer: Option<Arc<CacheWarmer>>,
    coalesce_window: Duration,
    started: Instant,
    active: AtomicI64,
    sampler: Mutex<Option<JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn new(
        config: &Config,
        store: Arc<dyn KvStore>,
        balancer: Arc<LoadBalancer>,
        dispatch: Arc<BackendDispatch>,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        let compute: Arc<dyn BatchCompute> = dispatch.clone();
        let cache = InferenceCache::new(store.clone(), metrics.clone());
        let batcher = RequestBatcher::new(&config.batching, compute.clone(), metrics.clone());
        let monitor = Arc::new(PerformanceMonitor::new(&config.monitor, store.clone(), metrics.clone()));
        let warmer = config.cache.warmer_enabled.then(|| {
            Arc::new(CacheWarmer::new(
                cache.clone(),
                compute,
                Duration::from_secs(config.cache.warmer_interval_secs),
            ))
        });
        let engine = &config.engine;
        Self {
            config: engine.clone(),
            cache,
            batcher,
            balancer,
            dispatch,
            monitor,
            metrics,
            context: ContextManager::new(store, engine.context_ttl_secs, engine.context_history),
            selector: BackendSelector::new(engine.complexity_threshold, engine.ab_test_fraction),
            warmer,
            coalesce_window: Duration::from_millis(config.cache.batch_window_ms),
            started: Instant::now(),
            active: AtomicI64::new(0),
            sampler: Mutex::new(None),
        }
    }

    pub fn cache(&self) -> &InferenceCache {
        &self.cache
    }

    pub fn batcher(&self) -> &RequestBatcher {
        &self.batcher
    }

    pub fn balancer(&self) -> &Arc<LoadBalancer> {
        &self.balancer
    }

    pub fn dispatch(&self) -> &Arc<BackendDispatch> {
        &self.dispatch
    }

    pub fn monitor(&self) -> &Arc<PerformanceMonitor> {
        &self.monitor
    }

    pub fn metrics(&self) -> &Arc<GatewayMetrics> {
        &self.metrics
    }

    pub async fn process(&self, mut request: AIRequest) -> AIResponse {
        let start = Instant::now();
        let deadline = start + Duration::from_millis(request.timeout_ms);
        let _in_flight = InFlight::enter(self);

        let validation = Self::validate(&request);
        let validated = validation.is_ok();
        if validated {
            let stored = self.context.load(&request.user_id).await;
            ContextManager::enrich(&mut request, stored);
        }
        let backend = self.selector.select(&request, &self.dispatch);

        let outcome = match validation {
            Ok(()) => self.serve(&request, backend, deadline).await,
            Err(e) => Err(e),
        };
        let total_ms = start.elapsed().as_millis() as u64;

        let (response, outcome_label) = match outcome {
            Ok(served) => {
                let compute_ms = if served.cache_hit { 0 } else { served.result.processing_ms };
                let timing = ProcessingTime {
                    queue_ms: total_ms.saturating_sub(compute_ms),
                    compute_ms,
                    total_ms,
                };
                let label = if served.cache_hit { "cache_hit" } else { "success" };
                (Self::success(&request, served, timing), label)
            }
            Err(e) => {
                match &e {
                    GatewayError::RequestTimeout { .. } => {
                        tracing::warn!("Request {} timed out: {}", request.request_id, e)
                    }
                    GatewayError::InvalidRequest(_) => {
                        tracing::warn!("Request {} rejected: {}", request.request_id, e)
                    }
                    _ => tracing::error!("Request {} failed: {}", request.request_id, e),
                }
                let timing = ProcessingTime {
                    queue_ms: 0,
                    compute_ms: 0,
                    total_ms,
                };
                (
                    AIResponse::failure(request.request_id.clone(), e.to_info(Some(backend.as_str())), timing),
                    "error",
                )
            }
        };

        self.monitor
            .record_request(total_ms as f64, response.cache_hit, !response.success);
        self.metrics
            .requests_total
            .with_label_values(&[request.operation.as_str(), backend.as_str(), outcome_label])
            .inc();
        self.metrics
            .request_duration_seconds
            .with_label_values(&[request.operation.as_str()])
            .observe(start.elapsed().as_secs_f64());
        if validated {
            self.context.record(&request, &response).await;
        }
        response
    }

    fn validate(request: &AIRequest) -> Result<(), GatewayError> {
        if request.user_id.trim().is_empty() {
            return Err(GatewayError::InvalidRequest("user_id must not be empty".to_string()));
        }
        Ok(())
    }

    async fn serve(&self, request: &AIRequest, backend: BackendKind, deadline: Instant) -> Result<Served, GatewayError> {
        if request.cache_enabled {
            if let Some(result) = self.cache.get(request.operation, &request.user_id, &request.data).await {
                return Ok(Served {
                    result,
                    cache_hit: true,
                });
            }
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(GatewayError::RequestTimeout {
                after_ms: request.timeout_ms,
            });
        }
        let timed_out = || GatewayError::RequestTimeout {
            after_ms: request.timeout_ms,
        };
        let compute_request = ComputeRequest::from_request(request, backend);

        if request.batch_enabled && request.cache_enabled && self.config.batch_path == BatchPath::CacheCoalesce {
            let compute: Arc<dyn BatchCompute> = self.dispatch.clone();
            let lookup = tokio::time::timeout(
                remaining,
                self.cache
                    .get_or_compute_batched(compute_request, compute, self.coalesce_window),
            )
            .await
            .map_err(|_| timed_out())??;
            return Ok(Served {
                result: lookup.result,
                cache_hit: lookup.cache_hit,
            });
        }

        let result = if request.batch_enabled {
            self.batcher
                .execute(compute_request, request.priority, remaining)
                .await?
        } else {
            let mut results = tokio::time::timeout(remaining, self.dispatch.compute_batch(vec![compute_request]))
                .await
                .map_err(|_| timed_out())??;
            results
                .pop()
                .filter(|_| results.is_empty())
                .ok_or_else(|| GatewayError::BatchCompute("expected exactly one result".to_string()))?
        };

        if request.cache_enabled {
            self.cache
                .put(request.operation, &request.user_id, &request.data, &result)
                .await;
        }
        Ok(Served {
            result,
            cache_hit: false,
        })
    }

    fn success(request: &AIRequest, served: Served, timing: ProcessingTime) -> AIResponse {
        let Served { result, cache_hit } = served;
        AIResponse {
            request_id: request.request_id.clone(),
            success: true,
            data: result.data,
            insights: result.insights,
            recommendations: result.recommendations,
            confidence: result.confidence.unwrap_or(0.0),
            timing,
            cache_hit,
            batch_size: if cache_hit { 1 } else { result.batch_size },
            backend_used: result.backend.to_string(),
            endpoint_id: result.endpoint_id,
            agent_trace: result.agent_trace,
            retry_count: 0,
            error: None,
        }
    }

    pub async fn backend_status(&self) -> Vec<BackendStatus> {
        let mut statuses = Vec::new();
        for backend in self.dispatch.backends() {
            statuses.push(BackendStatus {
                backend: backend.kind(),
                healthy: backend.health_check().await,
                capabilities: backend.capabilities(),
                metrics: backend.performance_metrics(),
            });
        }
        statuses
    }

    pub async fn status(&self) -> EngineStatus {
        let services_running = self.sampler.lock().is_some();
        EngineStatus {
            uptime_seconds: self.started.elapsed().as_secs(),
            active_requests: self.active.load(Ordering::Relaxed),
            performance_grade: self.monitor.performance_grade(),
            services_running,
            cache: self.cache.stats(),
            batching: self.batcher.stats().await,
            load_balancer: self.balancer.stats(),
            monitor: self.monitor.status(),
            backends: self.backend_status().await,
        }
    }

    /// Record queue depth and in-flight endpoint load into the monitor.
    pub async fn sample(&self) {
        let queued = self.batcher.pending_count().await;
        self.monitor.record_sample(MetricType::QueueSize, queued as f64);
        let connections = self.balancer.stats().total_load;
        self.monitor
            .record_sample(MetricType::ConnectionCount, connections as f64);
    }

    /// Start health checks, cache warming, alert evaluation and sampling.
    pub fn start_services(self: &Arc<Self>) {
        let mut sampler = self.sampler.lock();
        if sampler.is_some() {
            return;
        }
        self.balancer.start_health_checks();
        if let Some(warmer) = &self.warmer {
            warmer.start();
        }
        self.monitor.start();

        let this = Arc::clone(self);
        let interval = Duration::from_secs(self.config.sampler_interval_secs.max(1));
        *sampler = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                this.sample().await;
            }
        }));
        tracing::info!("Engine services started");
    }

    pub fn stop_services(&self) {
        if let Some(task) = self.sampler.lock().take() {
            task.abort();
        }
        self.balancer.stop_health_checks();
        if let Some(warmer) = &self.warmer {
            warmer.stop();
        }
        self.monitor.stop();
        tracing::info!("Engine services stopped");
    }
}
