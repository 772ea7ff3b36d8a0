//! Wire types for gateway-to-model-endpoint communication.
//!
//! A model endpoint accepts a batch of items for one operation and returns
//! one output per item, in the same order:
//!
//! ```text
//! POST {address}/v1/infer
//! {"operation": "budget_optimization", "agent": null, "items": [{"request_id": "...", ...}]}
//!
//! 200 OK
//! {"outputs": [{"data": {...}, "confidence": 0.91, "insights": [], "recommendations": []}]}
//! ```

use serde::{Deserialize, Serialize};

use crate::Operation;

/// A single item inside a batched inference call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferItem {
    pub request_id: String,
    pub user_id: String,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub context: serde_json::Map<String, serde_json::Value>,
}

/// Request body sent to a model endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferBatchRequest {
    pub operation: Operation,
    /// Specialist agent name when the endpoint hosts an agent role.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    pub items: Vec<InferItem>,
}

/// Per-item result returned by a model endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferOutput {
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub insights: Vec<serde_json::Value>,
    #[serde(default)]
    pub recommendations: Vec<serde_json::Value>,
}

/// Response body returned by a model endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferBatchResponse {
    pub outputs: Vec<InferOutput>,
}
