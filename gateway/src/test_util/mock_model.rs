use fininfer_common::{InferBatchResponse, InferOutput};
use serde_json::json;

/// Canned bodies for a fake `POST /v1/infer` endpoint.
pub struct MockModelResponse;

impl MockModelResponse {
    pub fn output(confidence: f64) -> InferOutput {
        InferOutput {
            data: json!({"analysis": "complete"}),
            confidence: Some(confidence),
            insights: vec![json!("savings rate above target")],
            recommendations: vec![json!("increase emergency fund")],
        }
    }

    /// A response with `n` identical outputs.
    pub fn batch(n: usize, confidence: f64) -> InferBatchResponse {
        InferBatchResponse {
            outputs: (0..n).map(|_| Self::output(confidence)).collect(),
        }
    }

    pub fn json(n: usize) -> serde_json::Value {
        serde_json::to_value(Self::batch(n, 0.9)).unwrap_or_default()
    }

    pub fn error_json(message: &str) -> serde_json::Value {
        json!({ "error": message })
    }

    pub fn health_json() -> serde_json::Value {
        json!({ "status": "ok" })
    }
}
