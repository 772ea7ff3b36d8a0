//! Prometheus metrics for the gateway core.
//!
//! Every component receives an `Arc<GatewayMetrics>`; the registry is owned
//! by the value, so several gateways can live in one process (tests do).

use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge,
    IntGaugeVec, Opts, Registry, TextEncoder,
};

use crate::error::GatewayError;

const NAMESPACE: &str = "fininfer";

/// Metric handles, grouped by component.
#[derive(Clone)]
pub struct GatewayMetrics {
    registry: Registry,

    // Cache
    pub cache_requests: IntCounterVec,
    pub cache_writes: IntCounter,
    pub cache_invalidations: IntCounter,
    pub cache_operation_seconds: HistogramVec,

    // Batcher
    pub batch_size: Histogram,
    pub batch_wait_seconds: Histogram,
    pub batch_processing_seconds: Histogram,
    pub active_batches: IntGauge,
    pub batch_queue_size: IntGaugeVec,

    // Load balancer
    pub endpoint_requests: IntCounterVec,
    pub endpoint_load: IntGaugeVec,
    pub endpoint_response_seconds: HistogramVec,
    pub circuit_state: IntGaugeVec,

    // Engine
    pub requests_total: IntCounterVec,
    pub request_duration_seconds: HistogramVec,
    pub active_requests: IntGauge,

    // Monitor
    pub alerts_total: IntCounterVec,
    pub active_alerts: IntGauge,
}

fn opts(name: &str, help: &str) -> Opts {
    Opts::new(name, help).namespace(NAMESPACE)
}

fn hopts(name: &str, help: &str, buckets: Vec<f64>) -> HistogramOpts {
    HistogramOpts::new(name, help).namespace(NAMESPACE).buckets(buckets)
}

fn latency_buckets() -> Vec<f64> {
    vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.2, 0.3, 0.4, 0.5, 1.0, 2.5, 5.0]
}

impl GatewayMetrics {
    /// Create and register all metrics in a fresh registry.
    pub fn new() -> Result<Self, GatewayError> {
        let registry = Registry::new();

        let cache_requests = IntCounterVec::new(
            opts("cache_requests_total", "Cache lookups by operation and result"),
            &["operation", "result"],
        )?;
        let cache_writes = IntCounter::with_opts(opts("cache_writes_total", "Cache entries written"))?;
        let cache_invalidations = IntCounter::with_opts(opts(
            "cache_invalidations_total",
            "Cache entries removed by dependency invalidation",
        ))?;
        let cache_operation_seconds = HistogramVec::new(
            hopts("cache_operation_seconds", "Cache store round-trip time", latency_buckets()),
            &["op"],
        )?;

        let batch_size = Histogram::with_opts(hopts(
            "batch_size",
            "Requests per flushed batch",
            vec![1.0, 2.0, 4.0, 8.0, 16.0, 32.0, 64.0, 128.0],
        ))?;
        let batch_wait_seconds = Histogram::with_opts(hopts(
            "batch_wait_seconds",
            "Time the oldest request waited before its batch fired",
            latency_buckets(),
        ))?;
        let batch_processing_seconds = Histogram::with_opts(hopts(
            "batch_processing_seconds",
            "Batch compute time",
            latency_buckets(),
        ))?;
        let active_batches = IntGauge::with_opts(opts("active_batches", "Batches currently computing"))?;
        let batch_queue_size = IntGaugeVec::new(
            opts("batch_queue_size", "Pending batched requests by priority"),
            &["priority"],
        )?;

        let endpoint_requests = IntCounterVec::new(
            opts("endpoint_requests_total", "Released endpoint slots by outcome"),
            &["endpoint", "outcome"],
        )?;
        let endpoint_load = IntGaugeVec::new(
            opts("endpoint_load", "In-flight requests per endpoint"),
            &["endpoint"],
        )?;
        let endpoint_response_seconds = HistogramVec::new(
            hopts("endpoint_response_seconds", "Observed endpoint latency", latency_buckets()),
            &["endpoint"],
        )?;
        let circuit_state = IntGaugeVec::new(
            opts("circuit_state", "Circuit breaker state (0 closed, 1 half-open, 2 open)"),
            &["endpoint"],
        )?;

        let requests_total = IntCounterVec::new(
            opts("requests_total", "Processed requests"),
            &["operation", "backend", "outcome"],
        )?;
        let request_duration_seconds = HistogramVec::new(
            hopts("request_duration_seconds", "End-to-end request latency", latency_buckets()),
            &["operation"],
        )?;
        let active_requests = IntGauge::with_opts(opts("active_requests", "Requests being processed"))?;

        let alerts_total = IntCounterVec::new(
            opts("alerts_total", "Performance alerts raised"),
            &["metric", "severity"],
        )?;
        let active_alerts = IntGauge::with_opts(opts("active_alerts", "Unresolved performance alerts"))?;

        registry.register(Box::new(cache_requests.clone()))?;
        registry.register(Box::new(cache_writes.clone()))?;
        registry.register(Box::new(cache_invalidations.clone()))?;
        registry.register(Box::new(cache_operation_seconds.clone()))?;
        registry.register(Box::new(batch_size.clone()))?;
        registry.register(Box::new(batch_wait_seconds.clone()))?;
        registry.register(Box::new(batch_processing_seconds.clone()))?;
        registry.register(Box::new(active_batches.clone()))?;
        registry.register(Box::new(batch_queue_size.clone()))?;
        registry.register(Box::new(endpoint_requests.clone()))?;
        registry.register(Box::new(endpoint_load.clone()))?;
        registry.register(Box::new(endpoint_response_seconds.clone()))?;
        registry.register(Box::new(circuit_state.clone()))?;
        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(request_duration_seconds.clone()))?;
        registry.register(Box::new(active_requests.clone()))?;
        registry.register(Box::new(alerts_total.clone()))?;
        registry.register(Box::new(active_alerts.clone()))?;

        Ok(Self {
            registry,
            cache_requests,
            cache_writes,
            cache_invalidations,
            cache_operation_seconds,
            batch_size,
            batch_wait_seconds,
            batch_processing_seconds,
            active_batches,
            batch_queue_size,
            endpoint_requests,
            endpoint_load,
            endpoint_response_seconds,
            circuit_state,
            requests_total,
            request_duration_seconds,
            active_requests,
            alerts_total,
            active_alerts,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render the registry in the Prometheus text exposition format.
    pub fn render(&self) -> Result<String, GatewayError> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| GatewayError::Monitoring(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| GatewayError::Monitoring(e.to_string()))
    }
}
