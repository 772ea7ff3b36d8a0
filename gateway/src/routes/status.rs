use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};

use crate::engine::EngineStatus;
use crate::AppState;

/// GET /status - engine, cache, batcher, balancer and monitor snapshot
async fn status(State(state): State<Arc<AppState>>) -> Json<EngineStatus> {
    Json(state.engine.status().await)
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new().route("/status", get(status)).with_state(state)
}
