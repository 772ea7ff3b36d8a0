use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use fininfer_common::{BackendKind, Operation};
use futures_util::future::join_all;
use parking_lot::RwLock;

use super::InferenceBackend;
use crate::compute::{BatchCompute, ComputeRequest, ComputeResult};
use crate::error::GatewayError;

/// Routes compute batches to the backend named by each request.
///
/// A mixed batch is split per backend and operation, the groups run
/// concurrently and results come back in request order. Any failing group
/// fails the whole batch.
#[derive(Default)]
pub struct BackendDispatch {
    backends: RwLock<HashMap<BackendKind, Arc<dyn InferenceBackend>>>,
}

impl BackendDispatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend under its kind, replacing any previous one.
    pub fn register(&self, backend: Arc<dyn InferenceBackend>) {
        let kind = backend.kind();
        self.backends.write().insert(kind, backend);
        tracing::info!("Registered {} backend", kind);
    }

    pub fn get(&self, kind: BackendKind) -> Option<Arc<dyn InferenceBackend>> {
        self.backends.read().get(&kind).cloned()
    }

    /// Registered backends ordered by kind.
    pub fn backends(&self) -> Vec<Arc<dyn InferenceBackend>> {
        let backends = self.backends.read();
        let mut kinds: Vec<BackendKind> = backends.keys().copied().collect();
        kinds.sort();
        kinds.into_iter().filter_map(|k| backends.get(&k).cloned()).collect()
    }

    async fn run_group(
        &self,
        kind: BackendKind,
        requests: Vec<ComputeRequest>,
    ) -> Result<Vec<ComputeResult>, GatewayError> {
        let backend = self.get(kind).ok_or_else(|| GatewayError::Backend {
            backend: kind.to_string(),
            endpoint: "none".to_string(),
            message: "backend not registered".to_string(),
        })?;
        let results = backend.execute_batch(&requests).await?;
        if results.len() != requests.len() {
            return Err(GatewayError::BatchCompute(format!(
                "{} backend returned {} results for {} requests",
                kind,
                results.len(),
                requests.len()
            )));
        }
        Ok(results)
    }
}

#[async_trait]
impl BatchCompute for BackendDispatch {
    async fn compute_batch(&self, requests: Vec<ComputeRequest>) -> Result<Vec<ComputeResult>, GatewayError> {
        let total = requests.len();
        let mut order: Vec<(BackendKind, Operation)> = Vec::new();
        let mut groups: HashMap<(BackendKind, Operation), (Vec<usize>, Vec<ComputeRequest>)> = HashMap::new();
        for (idx, request) in requests.into_iter().enumerate() {
            let key = (request.backend, request.operation);
            let group = groups.entry(key).or_insert_with(|| {
                order.push(key);
                (Vec::new(), Vec::new())
            });
            group.0.push(idx);
            group.1.push(request);
        }

        let mut positions = Vec::with_capacity(order.len());
        let mut calls = Vec::with_capacity(order.len());
        for key in &order {
            if let Some((idx, reqs)) = groups.remove(key) {
                positions.push(idx);
                calls.push(self.run_group(key.0, reqs));
            }
        }

        let mut slots: Vec<Option<ComputeResult>> = vec![None; total];
        for (idx, outcome) in positions.into_iter().zip(join_all(calls).await) {
            for (i, result) in idx.into_iter().zip(outcome?) {
                slots[i] = Some(result);
            }
        }
        slots
            .into_iter()
            .map(|slot| slot.ok_or_else(|| GatewayError::BatchCompute("missing result".to_string())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::sample_result;
    use fininfer_common::{BackendCapabilities, PerformanceMetrics};
    use parking_lot::Mutex;
    use serde_json::json;

    struct FakeBackend {
        kind: BackendKind,
        fail: bool,
        seen: Mutex<Vec<usize>>,
    }

    impl FakeBackend {
        fn new(kind: BackendKind, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                kind,
                fail,
                seen: Mutex::new(vec![]),
            })
        }
    }

    #[async_trait]
    impl InferenceBackend for FakeBackend {
        fn kind(&self) -> BackendKind {
            self.kind
        }

        async fn execute_batch(&self, requests: &[ComputeRequest]) -> Result<Vec<ComputeResult>, GatewayError> {
            self.seen.lock().push(requests.len());
            if self.fail {
                return Err(GatewayError::BatchCompute("down".to_string()));
            }
            Ok(requests
                .iter()
                .map(|r| ComputeResult {
                    data: json!({"user": r.user_id}),
                    backend: self.kind,
                    ..sample_result(0.9)
                })
                .collect())
        }

        fn capabilities(&self) -> BackendCapabilities {
            BackendCapabilities {
                backend: self.kind,
                supported_operations: Operation::ALL.to_vec(),
                available_agents: vec![],
                max_concurrent_requests: 1,
                avg_response_time_ms: None,
            }
        }

        fn performance_metrics(&self) -> PerformanceMetrics {
            PerformanceMetrics::default()
        }

        async fn health_check(&self) -> bool {
            true
        }
    }

    fn request(user: &str, op: Operation, backend: BackendKind) -> ComputeRequest {
        ComputeRequest::new(user, op, json!({}), backend)
    }

    #[tokio::test]
    async fn test_mixed_batch_keeps_request_order() {
        let single = FakeBackend::new(BackendKind::SingleModel, false);
        let agents = FakeBackend::new(BackendKind::CoordinatedAgents, false);
        let dispatch = BackendDispatch::new();
        dispatch.register(single.clone());
        dispatch.register(agents.clone());

        let results = dispatch
            .compute_batch(vec![
                request("a", Operation::BudgetOptimization, BackendKind::SingleModel),
                request("b", Operation::BudgetOptimization, BackendKind::CoordinatedAgents),
                request("c", Operation::BudgetOptimization, BackendKind::SingleModel),
                request("d", Operation::DebtStrategy, BackendKind::SingleModel),
            ])
            .await
            .unwrap();

        let users: Vec<&str> = results.iter().map(|r| r.data["user"].as_str().unwrap()).collect();
        assert_eq!(users, vec!["a", "b", "c", "d"]);
        assert_eq!(results[1].backend, BackendKind::CoordinatedAgents);
        let mut single_sizes = single.seen.lock().clone();
        single_sizes.sort();
        assert_eq!(single_sizes, vec![1, 2]);
        assert_eq!(*agents.seen.lock(), vec![1]);
    }

    #[tokio::test]
    async fn test_failing_group_fails_batch() {
        let dispatch = BackendDispatch::new();
        dispatch.register(FakeBackend::new(BackendKind::SingleModel, false));
        dispatch.register(FakeBackend::new(BackendKind::CoordinatedAgents, true));

        let err = dispatch
            .compute_batch(vec![
                request("a", Operation::GoalPlanning, BackendKind::SingleModel),
                request("b", Operation::GoalPlanning, BackendKind::CoordinatedAgents),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::BatchCompute(_)));
    }

    #[tokio::test]
    async fn test_unregistered_backend() {
        let dispatch = BackendDispatch::new();
        let err = dispatch
            .compute_batch(vec![request("a", Operation::GoalPlanning, BackendKind::SingleModel)])
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Backend { ref message, .. } if message == "backend not registered"));
    }

    #[test]
    fn test_backends_sorted_by_kind() {
        let dispatch = BackendDispatch::new();
        dispatch.register(FakeBackend::new(BackendKind::CoordinatedAgents, false));
        dispatch.register(FakeBackend::new(BackendKind::SingleModel, false));
        let kinds: Vec<BackendKind> = dispatch.backends().iter().map(|b| b.kind()).collect();
        assert_eq!(kinds, vec![BackendKind::SingleModel, BackendKind::CoordinatedAgents]);
    }
}
