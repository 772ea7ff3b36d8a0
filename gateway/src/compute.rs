//! The batch-compute seam shared by the cache, the batcher and the backends.

use async_trait::async_trait;
use fininfer_common::{AIRequest, BackendKind, InferItem, Operation};
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

/// One request inside a compute batch.
#[derive(Debug, Clone)]
pub struct ComputeRequest {
    pub request_id: String,
    pub user_id: String,
    pub operation: Operation,
    pub data: serde_json::Value,
    pub context: serde_json::Map<String, serde_json::Value>,
    /// Backend that should execute the batch.
    pub backend: BackendKind,
}

impl ComputeRequest {
    pub fn new(
        user_id: impl Into<String>,
        operation: Operation,
        data: serde_json::Value,
        backend: BackendKind,
    ) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            operation,
            data,
            context: serde_json::Map::new(),
            backend,
        }
    }

    pub fn from_request(request: &AIRequest, backend: BackendKind) -> Self {
        Self {
            request_id: request.request_id.clone(),
            user_id: request.user_id.clone(),
            operation: request.operation,
            data: request.data.clone(),
            context: request.context.clone(),
            backend,
        }
    }

    pub fn to_item(&self) -> InferItem {
        InferItem {
            request_id: self.request_id.clone(),
            user_id: self.user_id.clone(),
            data: self.data.clone(),
            context: self.context.clone(),
        }
    }
}

/// Result for one request of a compute batch.
///
/// This is also the value stored in the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeResult {
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub insights: Vec<serde_json::Value>,
    #[serde(default)]
    pub recommendations: Vec<serde_json::Value>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub endpoint_id: String,
    pub backend: BackendKind,
    #[serde(default)]
    pub processing_ms: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub agent_trace: Vec<String>,
}

fn default_batch_size() -> usize {
    1
}

/// Executes a batch of requests in one pass.
///
/// Implementations return exactly one result per request, in request order.
#[async_trait]
pub trait BatchCompute: Send + Sync {
    async fn compute_batch(&self, requests: Vec<ComputeRequest>) -> Result<Vec<ComputeResult>, GatewayError>;
}
