//! Ops HTTP surface.

pub mod admin;
pub mod health;
pub mod process;
pub mod status;

use std::sync::Arc;

use axum::{middleware, Router};

use crate::logging::request_logger;
use crate::AppState;

/// All routes with request logging.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(health::router(state.clone()))
        .merge(status::router(state.clone()))
        .merge(process::router(state.clone()))
        .nest("/admin", admin::router(state))
        .layer(middleware::from_fn(request_logger))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{BackendDispatch, SimulatedModelClient, SingleModelBackend};
    use crate::balancer::LoadBalancer;
    use crate::config::Config;
    use crate::engine::Orchestrator;
    use crate::metrics::GatewayMetrics;
    use crate::store::MemoryStore;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use fininfer_common::{AIRequest, Operation};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn state(endpoints: bool) -> Arc<AppState> {
        let mut config = Config::default();
        config.engine.ab_test_fraction = 0.0;
        let metrics = Arc::new(GatewayMetrics::new().unwrap());
        let balancer = Arc::new(LoadBalancer::new(&config.balancer, metrics.clone()));
        if endpoints {
            balancer.register_endpoint("model-1", "http://sim", 16, 1.0);
        }
        let dispatch = Arc::new(BackendDispatch::new());
        dispatch.register(Arc::new(SingleModelBackend::new(
            balancer.clone(),
            Arc::new(SimulatedModelClient::new(0.0).with_latency_scale(0.0)),
        )));
        let engine = Orchestrator::new(&config, Arc::new(MemoryStore::new()), balancer, dispatch, metrics);
        Arc::new(AppState {
            config,
            engine: Arc::new(engine),
        })
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_ok() {
        let response = router(state(true)).oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["backends"]["single_model"], true);
    }

    #[tokio::test]
    async fn test_health_degraded_without_endpoints() {
        let response = router(state(false)).oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_json(response).await["status"], "degraded");
    }

    #[tokio::test]
    async fn test_metrics_exposition() {
        let state = state(true);
        state
            .engine
            .process(AIRequest::new("u1", Operation::DebtStrategy, json!({})))
            .await;
        let response = router(state).oneshot(get("/metrics")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("requests_total"));
    }

    #[tokio::test]
    async fn test_status_snapshot() {
        let response = router(state(true)).oneshot(get("/status")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["load_balancer"]["total_endpoints"], 1);
        assert_eq!(body["backends"][0]["backend"], "single_model");
        assert_eq!(body["performance_grade"], "N/A");
    }

    #[tokio::test]
    async fn test_invalidate() {
        let state = state(true);
        let response = router(state.clone())
            .oneshot(post("/admin/invalidate", json!({"tag": "user:u1"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["invalidated"], 0);

        let response = router(state)
            .oneshot(post("/admin/invalidate", json!({"tag": "  "})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_process_round_trip() {
        let state = state(true);
        let request = json!({"user_id": "u2", "operation": "goal_planning", "data": {"goal": "house"}});
        let response = router(state.clone()).oneshot(post("/v1/process", request.clone())).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["cache_hit"], false);

        let again = body_json(router(state).oneshot(post("/v1/process", request)).await.unwrap()).await;
        assert_eq!(again["cache_hit"], true);
    }

    #[tokio::test]
    async fn test_process_without_endpoints_is_unavailable() {
        let request = json!({"user_id": "u3", "operation": "goal_planning", "batch_enabled": false});
        let response = router(state(false)).oneshot(post("/v1/process", request)).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_json(response).await["error"]["kind"], "no_healthy_endpoint");
    }

    #[tokio::test]
    async fn test_process_rejects_empty_user() {
        let request = json!({"user_id": "", "operation": "goal_planning"});
        let response = router(state(true)).oneshot(post("/v1/process", request)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["kind"], "invalid_request");
        assert_eq!(body["error"]["retryable"], false);
    }
}
