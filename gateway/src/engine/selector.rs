//! Choosing a backend per request.

use fininfer_common::{AIRequest, BackendKind, Operation, PerformanceMetrics, Priority};
use sha2::{Digest, Sha256};

use crate::backends::BackendDispatch;

/// How much an operation benefits from specialist agents.
pub fn operation_weight(operation: Operation) -> f64 {
    match operation {
        Operation::BudgetOptimization => 0.6,
        Operation::PortfolioAnalysis => 0.8,
        Operation::DebtStrategy => 0.7,
        Operation::MarketIntelligence => 0.9,
        Operation::GoalPlanning => 0.8,
        Operation::FinancialAnalysis => 0.5,
    }
}

/// Request complexity in `[0, 1]`.
pub fn complexity(request: &AIRequest) -> f64 {
    let payload = (request.data.to_string().len() as f64 / 10_000.0).min(1.0);
    let priority = if request.priority == Priority::High { 0.3 } else { 0.1 };
    (payload + operation_weight(request.operation) + priority) / 3.0
}

/// A/B assignment for a user, stable across processes.
///
/// Returns `None` for users outside the test fraction.
pub fn ab_variant(user_id: &str, fraction: f64) -> Option<BackendKind> {
    let digest = Sha256::digest(user_id.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    let bucket = u64::from_be_bytes(head) % 100;
    if (bucket as f64) >= fraction.clamp(0.0, 1.0) * 100.0 {
        return None;
    }
    if digest[8] % 2 == 0 {
        Some(BackendKind::CoordinatedAgents)
    } else {
        Some(BackendKind::SingleModel)
    }
}

/// Whether rolling metrics allow sending complex work to a backend.
pub fn healthy_by_metrics(metrics: &PerformanceMetrics) -> bool {
    metrics.success_rate > 0.95 && metrics.avg_response_time_ms < 500.0 && metrics.resource_utilization < 0.9
}

#[derive(Debug, Clone, Copy)]
pub struct BackendSelector {
    pub complexity_threshold: f64,
    pub ab_test_fraction: f64,
}

impl BackendSelector {
    pub fn new(complexity_threshold: f64, ab_test_fraction: f64) -> Self {
        Self {
            complexity_threshold,
            ab_test_fraction,
        }
    }

    pub fn select(&self, request: &AIRequest, dispatch: &BackendDispatch) -> BackendKind {
        if let Some(variant) = ab_variant(&request.user_id, self.ab_test_fraction) {
            if dispatch.get(variant).is_some() {
                tracing::debug!("User {} in A/B variant {}", request.user_id, variant);
                return variant;
            }
        }

        let score = complexity(request);
        if score > self.complexity_threshold {
            if let Some(agents) = dispatch.get(BackendKind::CoordinatedAgents) {
                if healthy_by_metrics(&agents.performance_metrics()) {
                    return BackendKind::CoordinatedAgents;
                }
                tracing::debug!("Coordinated agents degraded, routing complex request to single model");
            }
        }
        BackendKind::SingleModel
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_complexity() {
        let request = AIRequest::new("u", Operation::MarketIntelligence, json!({}));
        let expected = (2.0 / 10_000.0 + 0.9 + 0.1) / 3.0;
        assert!((complexity(&request) - expected).abs() < 1e-9);

        let heavy = AIRequest::new("u", Operation::MarketIntelligence, json!({"blob": "x".repeat(20_000)}))
            .with_priority(Priority::High);
        assert!((complexity(&heavy) - (1.0 + 0.9 + 0.3) / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_ab_assignment_is_stable_and_bounded() {
        assert_eq!(ab_variant("user-42", 0.2), ab_variant("user-42", 0.2));
        assert!(ab_variant("user-42", 0.0).is_none());
        assert!((0..100).all(|i| ab_variant(&format!("u{}", i), 1.0).is_some()));

        let assigned = (0..2000)
            .filter(|i| ab_variant(&format!("user-{}", i), 0.2).is_some())
            .count();
        assert!((300..500).contains(&assigned), "assigned {}", assigned);
    }

    #[test]
    fn test_metric_health_rule() {
        let good = PerformanceMetrics::default();
        assert!(healthy_by_metrics(&good));
        let slow = PerformanceMetrics {
            avg_response_time_ms: 650.0,
            ..PerformanceMetrics::default()
        };
        assert!(!healthy_by_metrics(&slow));
        let busy = PerformanceMetrics {
            resource_utilization: 0.95,
            ..PerformanceMetrics::default()
        };
        assert!(!healthy_by_metrics(&busy));
    }

    #[test]
    fn test_select_without_agents_falls_back() {
        let dispatch = BackendDispatch::new();
        let selector = BackendSelector::new(0.0, 1.0);
        let request = AIRequest::new("u", Operation::PortfolioAnalysis, json!({}));
        assert_eq!(selector.select(&request, &dispatch), BackendKind::SingleModel);
    }
}
