//! Gateway error taxonomy.

use fininfer_common::{ErrorInfo, ErrorKind};
use thiserror::Error;

use crate::store::StoreError;

/// Errors raised inside the gateway core.
///
/// Values are `Clone` so a single batch failure can be delivered to every
/// caller waiting on that batch.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("Cache error: {0}")]
    Cache(String),
    #[error("Batch computation failed: {0}")]
    BatchCompute(String),
    #[error("No healthy endpoint available for {0}")]
    NoHealthyEndpoint(String),
    #[error("Circuit open for endpoint '{endpoint}'")]
    CircuitOpen { endpoint: String },
    #[error("Request timed out after {after_ms}ms")]
    RequestTimeout { after_ms: u64 },
    #[error("Backend '{backend}' failed on endpoint '{endpoint}': {message}")]
    Backend {
        backend: String,
        endpoint: String,
        message: String,
    },
    #[error("Monitoring error: {0}")]
    Monitoring(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::Cache(_) => ErrorKind::Cache,
            GatewayError::BatchCompute(_) => ErrorKind::BatchCompute,
            GatewayError::NoHealthyEndpoint(_) => ErrorKind::NoHealthyEndpoint,
            GatewayError::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            GatewayError::RequestTimeout { .. } => ErrorKind::RequestTimeout,
            GatewayError::Backend { .. } => ErrorKind::Backend,
            GatewayError::Monitoring(_) => ErrorKind::Monitoring,
            GatewayError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            GatewayError::Config(_) => ErrorKind::Internal,
        }
    }

    /// Whether the same request may succeed on retry.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::BatchCompute(_)
                | GatewayError::NoHealthyEndpoint(_)
                | GatewayError::CircuitOpen { .. }
                | GatewayError::RequestTimeout { .. }
                | GatewayError::Backend { .. }
        )
    }

    /// Endpoint named by the error, if any.
    pub fn endpoint(&self) -> Option<&str> {
        match self {
            GatewayError::CircuitOpen { endpoint } => Some(endpoint),
            GatewayError::Backend { endpoint, .. } => Some(endpoint),
            _ => None,
        }
    }

    /// Convert into the structured error carried by a failed response.
    pub fn to_info(&self, backend: Option<&str>) -> ErrorInfo {
        let backend = match self {
            GatewayError::Backend { backend, .. } => Some(backend.clone()),
            _ => backend.map(str::to_string),
        };
        ErrorInfo {
            kind: self.kind(),
            message: self.to_string(),
            backend,
            endpoint: self.endpoint().map(str::to_string),
            retryable: self.retryable(),
        }
    }
}

impl From<StoreError> for GatewayError {
    fn from(err: StoreError) -> Self {
        GatewayError::Cache(err.to_string())
    }
}

impl From<config::ConfigError> for GatewayError {
    fn from(err: config::ConfigError) -> Self {
        GatewayError::Config(err.to_string())
    }
}

impl From<prometheus::Error> for GatewayError {
    fn from(err: prometheus::Error) -> Self {
        GatewayError::Config(format!("metric registration failed: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(GatewayError::NoHealthyEndpoint("pool 'general'".into()), true)]
    #[case(GatewayError::CircuitOpen { endpoint: "ep-1".into() }, true)]
    #[case(GatewayError::RequestTimeout { after_ms: 100 }, true)]
    #[case(GatewayError::BatchCompute("boom".into()), true)]
    #[case(GatewayError::Cache("down".into()), false)]
    #[case(GatewayError::Config("bad".into()), false)]
    #[case(GatewayError::InvalidRequest("empty user".into()), false)]
    fn test_retryable(#[case] err: GatewayError, #[case] expected: bool) {
        assert_eq!(err.retryable(), expected);
    }

    #[test]
    fn test_backend_error_info() {
        let err = GatewayError::Backend {
            backend: "coordinated_agents".into(),
            endpoint: "agent-1".into(),
            message: "HTTP 503".into(),
        };
        let info = err.to_info(Some("single_model"));
        assert_eq!(info.kind, ErrorKind::Backend);
        assert_eq!(info.backend.as_deref(), Some("coordinated_agents"));
        assert_eq!(info.endpoint.as_deref(), Some("agent-1"));
        assert!(info.retryable);
    }

    #[test]
    fn test_store_error_maps_to_cache() {
        let err: GatewayError = StoreError::Connection("refused".into()).into();
        assert_eq!(err.kind(), ErrorKind::Cache);
    }
}
