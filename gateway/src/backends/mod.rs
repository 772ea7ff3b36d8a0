//! Inference backends and the dispatch that routes batches to them.

mod client;
mod coordinated;
mod dispatch;
mod single_model;

pub use client::{HttpModelClient, ModelClient, ModelClientError, SimulatedModelClient};
pub use coordinated::{agents_for, CoordinatedAgentBackend, ALL_AGENTS};
pub use dispatch::BackendDispatch;
pub use single_model::SingleModelBackend;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use fininfer_common::{BackendCapabilities, BackendKind, PerformanceMetrics};
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::balancer::BackendEndpoint;
use crate::compute::{ComputeRequest, ComputeResult};
use crate::error::GatewayError;

/// A strategy for executing a batch of same-operation requests.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Execute a batch. Returns one result per request, in request order.
    async fn execute_batch(&self, requests: &[ComputeRequest]) -> Result<Vec<ComputeResult>, GatewayError>;

    fn capabilities(&self) -> BackendCapabilities;

    fn performance_metrics(&self) -> PerformanceMetrics;

    async fn health_check(&self) -> bool;
}

/// Calls kept for rolling backend metrics.
const STATS_WINDOW: usize = 100;
/// Span used for the throughput estimate.
const THROUGHPUT_SPAN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
struct CallSample {
    at: Instant,
    latency_ms: f64,
    success: bool,
    confidence: Option<f64>,
    requests: usize,
}

/// Rolling window of a backend's recent calls.
#[derive(Debug, Default)]
pub struct RollingStats {
    samples: Mutex<VecDeque<CallSample>>,
}

impl RollingStats {
    pub fn record(&self, latency: Duration, success: bool, confidence: Option<f64>, requests: usize) {
        let mut samples = self.samples.lock();
        if samples.len() == STATS_WINDOW {
            samples.pop_front();
        }
        samples.push_back(CallSample {
            at: Instant::now(),
            latency_ms: latency.as_secs_f64() * 1000.0,
            success,
            confidence,
            requests,
        });
    }

    pub fn avg_latency_ms(&self) -> Option<f64> {
        let samples = self.samples.lock();
        if samples.is_empty() {
            return None;
        }
        Some(samples.iter().map(|s| s.latency_ms).sum::<f64>() / samples.len() as f64)
    }

    /// Snapshot with the given pool utilization. No calls yet means success rate 1.0.
    pub fn snapshot(&self, resource_utilization: f64) -> PerformanceMetrics {
        let samples = self.samples.lock();
        if samples.is_empty() {
            return PerformanceMetrics {
                resource_utilization,
                ..PerformanceMetrics::default()
            };
        }
        let n = samples.len() as f64;
        let successes = samples.iter().filter(|s| s.success).count() as f64;
        let confidences: Vec<f64> = samples.iter().filter_map(|s| s.confidence).collect();
        let recent: usize = samples
            .iter()
            .filter(|s| s.at.elapsed() <= THROUGHPUT_SPAN)
            .map(|s| s.requests)
            .sum();
        PerformanceMetrics {
            avg_response_time_ms: samples.iter().map(|s| s.latency_ms).sum::<f64>() / n,
            success_rate: successes / n,
            throughput_rps: recent as f64 / THROUGHPUT_SPAN.as_secs_f64(),
            resource_utilization,
            accuracy_score: if confidences.is_empty() {
                0.0
            } else {
                confidences.iter().sum::<f64>() / confidences.len() as f64
            },
            last_updated: Utc::now(),
        }
    }
}

/// Load over capacity across `endpoints`.
pub fn pool_utilization(endpoints: &[Arc<BackendEndpoint>]) -> f64 {
    let capacity: u64 = endpoints.iter().map(|ep| ep.capacity as u64).sum();
    if capacity == 0 {
        return 0.0;
    }
    let load: u64 = endpoints.iter().map(|ep| ep.load() as u64).sum();
    load as f64 / capacity as f64
}

/// Whether any endpoint can take a call right now.
pub fn pool_available(endpoints: &[Arc<BackendEndpoint>]) -> bool {
    endpoints
        .iter()
        .any(|ep| ep.is_healthy() && ep.has_capacity() && ep.breaker.allows_request())
}

fn mean_confidence(results: &[ComputeResult]) -> Option<f64> {
    let values: Vec<f64> = results.iter().filter_map(|r| r.confidence).collect();
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}
