//! POST /v1/process - run one inference request through the orchestrator.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use fininfer_common::{AIRequest, AIResponse, ErrorKind};

use crate::AppState;

fn status_for(response: &AIResponse) -> StatusCode {
    match response.error.as_ref().map(|e| e.kind) {
        None => StatusCode::OK,
        Some(ErrorKind::InvalidRequest) => StatusCode::BAD_REQUEST,
        Some(ErrorKind::RequestTimeout) => StatusCode::GATEWAY_TIMEOUT,
        Some(ErrorKind::NoHealthyEndpoint) | Some(ErrorKind::CircuitOpen) => StatusCode::SERVICE_UNAVAILABLE,
        Some(_) => StatusCode::BAD_GATEWAY,
    }
}

async fn process(State(state): State<Arc<AppState>>, Json(request): Json<AIRequest>) -> (StatusCode, Json<AIResponse>) {
    let response = state.engine.process(request).await;
    (status_for(&response), Json(response))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new().route("/v1/process", post(process)).with_state(state)
}
