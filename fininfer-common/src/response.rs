//! Response envelope returned by the engine.

use serde::{Deserialize, Serialize};

/// Timing breakdown for a processed request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingTime {
    /// Time spent waiting for a batch to fire (or for the compute call to start).
    pub queue_ms: u64,
    /// Time spent inside the backend compute call.
    pub compute_ms: u64,
    /// Wall-clock time from arrival to response.
    pub total_ms: u64,
}

/// Category of a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Cache,
    BatchCompute,
    NoHealthyEndpoint,
    CircuitOpen,
    RequestTimeout,
    Backend,
    Monitoring,
    InvalidRequest,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Cache => "cache",
            ErrorKind::BatchCompute => "batch_compute",
            ErrorKind::NoHealthyEndpoint => "no_healthy_endpoint",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::RequestTimeout => "request_timeout",
            ErrorKind::Backend => "backend",
            ErrorKind::Monitoring => "monitoring",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error carried by a failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
    /// Backend that was serving the request, if one had been chosen.
    #[serde(default)]
    pub backend: Option<String>,
    /// Endpoint that failed, if known.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Whether retrying the same request may succeed.
    pub retryable: bool,
}

/// Unified AI response with performance metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AIResponse {
    pub request_id: String,
    pub success: bool,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub insights: Vec<serde_json::Value>,
    #[serde(default)]
    pub recommendations: Vec<serde_json::Value>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub timing: ProcessingTime,
    #[serde(default)]
    pub cache_hit: bool,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub backend_used: String,
    #[serde(default)]
    pub endpoint_id: String,
    #[serde(default)]
    pub agent_trace: Vec<String>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

fn default_batch_size() -> usize {
    1
}

impl AIResponse {
    /// Build a failed response. Data fields stay empty so a failure is never
    /// mistaken for a result.
    pub fn failure(request_id: impl Into<String>, error: ErrorInfo, timing: ProcessingTime) -> Self {
        Self {
            request_id: request_id.into(),
            success: false,
            data: serde_json::Value::Null,
            insights: vec![],
            recommendations: vec![],
            confidence: 0.0,
            timing,
            cache_hit: false,
            batch_size: 0,
            backend_used: error.backend.clone().unwrap_or_default(),
            endpoint_id: error.endpoint.clone().unwrap_or_default(),
            agent_trace: vec![],
            retry_count: 0,
            error: Some(error),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.error.as_ref().map(|e| e.retryable).unwrap_or(false)
    }
}
