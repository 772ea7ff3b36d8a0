use std::sync::Arc;

use async_trait::async_trait;
use fininfer_common::{BackendCapabilities, BackendKind, InferBatchRequest, Operation, PerformanceMetrics};

use super::{mean_confidence, pool_available, pool_utilization, InferenceBackend, ModelClient, RollingStats};
use crate::balancer::LoadBalancer;
use crate::compute::{ComputeRequest, ComputeResult};
use crate::error::GatewayError;

pub const GENERAL_POOL: &str = "general";

/// One batched call to one endpoint of the general pool.
pub struct SingleModelBackend {
    balancer: Arc<LoadBalancer>,
    client: Arc<dyn ModelClient>,
    pool: String,
    stats: RollingStats,
}

impl SingleModelBackend {
    pub fn new(balancer: Arc<LoadBalancer>, client: Arc<dyn ModelClient>) -> Self {
        Self {
            balancer,
            client,
            pool: GENERAL_POOL.to_string(),
            stats: RollingStats::default(),
        }
    }

    /// Serve from another endpoint pool.
    pub fn with_pool(mut self, pool: &str) -> Self {
        self.pool = pool.to_string();
        self
    }
}

#[async_trait]
impl InferenceBackend for SingleModelBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::SingleModel
    }

    async fn execute_batch(&self, requests: &[ComputeRequest]) -> Result<Vec<ComputeResult>, GatewayError> {
        let Some(first) = requests.first() else {
            return Ok(vec![]);
        };
        let operation = first.operation;
        let mut endpoint = self.balancer.lease(Some(&self.pool), Some(operation))?;

        let call = InferBatchRequest {
            operation,
            agent: None,
            items: requests.iter().map(ComputeRequest::to_item).collect(),
        };
        let outcome = self.client.infer_batch(&endpoint, &call).await;
        let latency = endpoint.finish(outcome.is_ok());

        let outputs = match outcome {
            Ok(outputs) => outputs,
            Err(e) => {
                self.stats.record(latency, false, None, requests.len());
                tracing::error!("Single-model call to {} failed: {}", endpoint.id, e);
                return Err(GatewayError::Backend {
                    backend: BackendKind::SingleModel.to_string(),
                    endpoint: endpoint.id.clone(),
                    message: e.to_string(),
                });
            }
        };

        let processing_ms = latency.as_millis() as u64;
        let batch_size = requests.len();
        let results: Vec<ComputeResult> = outputs
            .into_iter()
            .map(|output| ComputeResult {
                data: output.data,
                insights: output.insights,
                recommendations: output.recommendations,
                confidence: output.confidence,
                endpoint_id: endpoint.id.clone(),
                backend: BackendKind::SingleModel,
                processing_ms,
                batch_size,
                agent_trace: vec!["single-model".to_string()],
            })
            .collect();
        self.stats.record(latency, true, mean_confidence(&results), batch_size);
        tracing::debug!(
            "Single-model batch of {} for {} served by {} in {}ms",
            batch_size,
            operation,
            endpoint.id,
            processing_ms
        );
        Ok(results)
    }

    fn capabilities(&self) -> BackendCapabilities {
        let endpoints = self.balancer.pool(Some(&self.pool));
        let mut supported: Vec<Operation> = if endpoints.iter().any(|ep| ep.operations.is_empty()) {
            Operation::ALL.to_vec()
        } else {
            endpoints.iter().flat_map(|ep| ep.operations.iter().copied()).collect()
        };
        supported.sort();
        supported.dedup();
        BackendCapabilities {
            backend: BackendKind::SingleModel,
            supported_operations: supported,
            available_agents: vec![],
            max_concurrent_requests: endpoints.iter().map(|ep| ep.capacity).sum(),
            avg_response_time_ms: self.stats.avg_latency_ms(),
        }
    }

    fn performance_metrics(&self) -> PerformanceMetrics {
        self.stats
            .snapshot(pool_utilization(&self.balancer.pool(Some(&self.pool))))
    }

    async fn health_check(&self) -> bool {
        pool_available(&self.balancer.pool(Some(&self.pool)))
    }
}
