use std::sync::Arc;
use std::time::Duration;

use fininfer_common::{AIRequest, BackendKind, Operation, Priority};
use fininfer_gateway::backends::{BackendDispatch, SimulatedModelClient, SingleModelBackend};
use fininfer_gateway::balancer::LoadBalancer;
use fininfer_gateway::batching::RequestBatcher;
use fininfer_gateway::compute::ComputeRequest;
use fininfer_gateway::config::{BalancerConfig, BatchingConfig, Config};
use fininfer_gateway::store::MemoryStore;
use fininfer_gateway::test_util::counting_compute;
use fininfer_gateway::{GatewayMetrics, Orchestrator};
use futures_util::future::join_all;
use serde_json::json;

fn metrics() -> Arc<GatewayMetrics> {
    Arc::new(GatewayMetrics::new().unwrap())
}

#[tokio::test(start_paused = true)]
async fn forty_requests_flush_as_32_then_8() {
    let (counter, compute) = counting_compute();
    let config = BatchingConfig {
        max_batch_size: 32,
        ..BatchingConfig::default()
    };
    let batcher = RequestBatcher::new(&config, compute, metrics());

    let mut tickets = Vec::new();
    for i in 0..40 {
        let request = ComputeRequest::new(
            format!("user-{}", i),
            Operation::BudgetOptimization,
            json!({"income": 5000, "expenses": 3200}),
            BackendKind::SingleModel,
        );
        tickets.push(
            batcher
                .submit(request, Priority::Medium, Duration::from_secs(5))
                .await
                .unwrap(),
        );
    }
    let results = join_all(tickets.into_iter().map(|t| t.wait())).await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(counter.batch_sizes(), vec![32, 8]);
}

#[tokio::test]
async fn full_endpoint_is_skipped() {
    let balancer = LoadBalancer::new(&BalancerConfig::default(), metrics());
    let a = balancer.register_endpoint("a", "http://a", 10, 1.0);
    balancer.register_endpoint("b", "http://b", 10, 1.0);

    for _ in 0..10 {
        assert!(balancer.acquire(&a));
    }
    assert!(!balancer.acquire(&a));
    for _ in 0..5 {
        assert_eq!(balancer.select(None).unwrap().id, "b");
    }
}

#[tokio::test(start_paused = true)]
async fn tripped_breaker_excludes_then_readmits() {
    let balancer = LoadBalancer::new(&BalancerConfig::default(), metrics());
    let a = balancer.register_endpoint("a", "http://a", 10, 1.0);

    for _ in 0..5 {
        assert!(balancer.acquire(&a));
        balancer.release(&a, Duration::from_millis(20), false);
    }
    assert!(balancer.select(None).is_none());

    tokio::time::advance(Duration::from_secs(61)).await;
    let picked = balancer.select(None).expect("endpoint readmitted after timeout");
    assert_eq!(picked.id, "a");

    assert!(balancer.acquire(&a));
    balancer.release(&a, Duration::from_millis(20), true);
    assert_eq!(a.stats().circuit_breaker_failures, 0);
}

#[tokio::test]
async fn identical_request_is_served_from_cache() {
    let mut config = Config::default();
    config.engine.ab_test_fraction = 0.0;
    let metrics = metrics();
    let balancer = Arc::new(LoadBalancer::new(&config.balancer, metrics.clone()));
    balancer.register_endpoint("model-1", "http://sim", 32, 1.0);
    let dispatch = Arc::new(BackendDispatch::new());
    dispatch.register(Arc::new(SingleModelBackend::new(
        balancer.clone(),
        Arc::new(SimulatedModelClient::new(0.0).with_latency_scale(0.0)),
    )));
    let engine = Orchestrator::new(&config, Arc::new(MemoryStore::new()), balancer, dispatch, metrics);

    let request = || AIRequest::new("user-1", Operation::PortfolioAnalysis, json!({"risk": "moderate"}));
    let first = engine.process(request()).await;
    let second = engine.process(request()).await;

    assert!(first.success && !first.cache_hit);
    assert!(second.success && second.cache_hit);
    assert_eq!(second.data, first.data);
    assert_eq!(second.confidence, first.confidence);
}
