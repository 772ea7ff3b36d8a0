//! Endpoint selection strategies.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::endpoint::BackendEndpoint;

/// Strategy for selecting an endpoint among healthy candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// Cycle through candidates.
    RoundRobin,
    /// Fewest in-flight requests.
    LeastConnections,
    /// Lowest blend of latency, failure rate and utilization, over weight.
    #[default]
    WeightedResponseTime,
    /// Lowest blend of utilization and capped latency penalty, over weight.
    ResourceBased,
}

fn effective_weight(endpoint: &BackendEndpoint) -> f64 {
    endpoint.weight.max(1e-6)
}

fn utilization(endpoint: &BackendEndpoint) -> f64 {
    if endpoint.capacity == 0 {
        1.0
    } else {
        endpoint.load() as f64 / endpoint.capacity as f64
    }
}

/// `(latency_s + (1 − success_rate) + utilization) / weight`
pub fn response_time_score(endpoint: &BackendEndpoint) -> f64 {
    let latency = endpoint.avg_latency_ms() / 1000.0;
    let failure = 1.0 - endpoint.success_rate();
    (latency + failure + utilization(endpoint)) / effective_weight(endpoint)
}

/// `(utilization + min(latency_ms / 500, 2)) / weight`
pub fn resource_score(endpoint: &BackendEndpoint) -> f64 {
    let latency_penalty = (endpoint.avg_latency_ms() / 500.0).min(2.0);
    (utilization(endpoint) + latency_penalty) / effective_weight(endpoint)
}

impl SelectionStrategy {
    /// Pick one of `candidates`. Ties go to the earliest candidate.
    pub fn pick(
        self,
        candidates: &[Arc<BackendEndpoint>],
        round_robin: &AtomicUsize,
    ) -> Option<Arc<BackendEndpoint>> {
        if candidates.is_empty() {
            return None;
        }
        let chosen = match self {
            SelectionStrategy::RoundRobin => {
                let idx = round_robin.fetch_add(1, Ordering::Relaxed) % candidates.len();
                &candidates[idx]
            }
            SelectionStrategy::LeastConnections => candidates.iter().min_by_key(|ep| ep.load())?,
            SelectionStrategy::WeightedResponseTime => candidates
                .iter()
                .min_by(|a, b| response_time_score(a).total_cmp(&response_time_score(b)))?,
            SelectionStrategy::ResourceBased => candidates
                .iter()
                .min_by(|a, b| resource_score(a).total_cmp(&resource_score(b)))?,
        };
        Some(Arc::clone(chosen))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balancer::circuit::CircuitBreaker;
    use crate::config::EndpointConfig;
    use std::time::Duration;

    fn ep(id: &str, capacity: u32, weight: f64) -> Arc<BackendEndpoint> {
        let config = EndpointConfig {
            id: id.to_string(),
            address: format!("http://{}", id),
            capacity,
            weight,
            pool: "general".to_string(),
            operations: vec![],
        };
        Arc::new(BackendEndpoint::new(&config, CircuitBreaker::new(5, Duration::from_secs(60))))
    }

    #[test]
    fn test_round_robin_cycles() {
        let candidates = vec![ep("a", 10, 1.0), ep("b", 10, 1.0), ep("c", 10, 1.0)];
        let counter = AtomicUsize::new(0);
        let picks: Vec<String> = (0..4)
            .map(|_| SelectionStrategy::RoundRobin.pick(&candidates, &counter).unwrap().id.clone())
            .collect();
        assert_eq!(picks, vec!["a", "b", "c", "a"]);
    }

    #[test]
    fn test_least_connections() {
        let candidates = vec![ep("a", 10, 1.0), ep("b", 10, 1.0)];
        candidates[0].try_acquire();
        let counter = AtomicUsize::new(0);
        let pick = SelectionStrategy::LeastConnections.pick(&candidates, &counter).unwrap();
        assert_eq!(pick.id, "b");
    }

    #[test]
    fn test_weighted_response_time_prefers_fast_endpoint() {
        let candidates = vec![ep("slow", 10, 1.0), ep("fast", 10, 1.0)];
        for _ in 0..20 {
            candidates[0].record_outcome(Duration::from_millis(800), true);
            candidates[1].record_outcome(Duration::from_millis(50), true);
        }
        let counter = AtomicUsize::new(0);
        let pick = SelectionStrategy::WeightedResponseTime.pick(&candidates, &counter).unwrap();
        assert_eq!(pick.id, "fast");
    }

    #[test]
    fn test_weight_scales_score() {
        let light = ep("light", 10, 1.0);
        let heavy = ep("heavy", 10, 4.0);
        light.try_acquire();
        heavy.try_acquire();
        assert!((response_time_score(&light) - 0.1).abs() < 1e-9);
        assert!((response_time_score(&heavy) - 0.025).abs() < 1e-9);
        let counter = AtomicUsize::new(0);
        let pick = SelectionStrategy::ResourceBased.pick(&[light, heavy], &counter).unwrap();
        assert_eq!(pick.id, "heavy");
    }

    #[test]
    fn test_resource_score_caps_latency_penalty() {
        let ep = ep("a", 10, 1.0);
        for _ in 0..200 {
            ep.record_outcome(Duration::from_secs(10), true);
        }
        assert!((resource_score(&ep) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_candidates() {
        let counter = AtomicUsize::new(0);
        assert!(SelectionStrategy::default().pick(&[], &counter).is_none());
    }
}
