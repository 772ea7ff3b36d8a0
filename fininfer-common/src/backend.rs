//! Backend descriptors shared between the engine and status reporting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Operation;

/// The closed set of backend strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// One general model serves the whole request.
    SingleModel,
    /// A coordinator fans the request out to specialist agents.
    CoordinatedAgents,
}

impl BackendKind {
    pub const ALL: [BackendKind; 2] = [BackendKind::SingleModel, BackendKind::CoordinatedAgents];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::SingleModel => "single_model",
            BackendKind::CoordinatedAgents => "coordinated_agents",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a backend can do.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendCapabilities {
    pub backend: BackendKind,
    pub supported_operations: Vec<Operation>,
    /// Specialist agents (empty for single-model backends).
    #[serde(default)]
    pub available_agents: Vec<String>,
    pub max_concurrent_requests: u32,
    #[serde(default)]
    pub avg_response_time_ms: Option<f64>,
}

/// Rolling performance metrics reported by a backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub avg_response_time_ms: f64,
    /// Fraction of successful calls (0.0 to 1.0).
    pub success_rate: f64,
    pub throughput_rps: f64,
    /// Fraction of endpoint capacity in use (0.0 to 1.0).
    pub resource_utilization: f64,
    /// Mean reported confidence of recent results.
    pub accuracy_score: f64,
    pub last_updated: DateTime<Utc>,
}

impl Default for PerformanceMetrics {
    fn default() -> Self {
        Self {
            avg_response_time_ms: 0.0,
            success_rate: 1.0,
            throughput_rps: 0.0,
            resource_utilization: 0.0,
            accuracy_score: 0.0,
            last_updated: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_serialization() {
        let json = serde_json::to_string(&BackendKind::CoordinatedAgents).unwrap();
        assert_eq!(json, r#""coordinated_agents""#);
        for kind in BackendKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json.trim_matches('"'), kind.as_str());
        }
    }

    #[test]
    fn test_default_metrics_are_optimistic() {
        let metrics = PerformanceMetrics::default();
        assert_eq!(metrics.success_rate, 1.0);
        assert_eq!(metrics.resource_utilization, 0.0);
    }
}
