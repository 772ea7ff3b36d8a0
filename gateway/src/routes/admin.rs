//! Admin routes.
//!
//! - `POST /admin/invalidate` evicts cache entries registered under a dependency tag

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde::{Deserialize, Serialize};

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct InvalidateRequest {
    pub tag: String,
}

#[derive(Debug, Serialize)]
pub struct InvalidateResponse {
    pub tag: String,
    pub invalidated: u64,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

async fn invalidate(
    State(state): State<Arc<AppState>>,
    Json(body): Json<InvalidateRequest>,
) -> Result<Json<InvalidateResponse>, (StatusCode, Json<ErrorBody>)> {
    let tag = body.tag.trim();
    if tag.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorBody {
                error: "tag must not be empty".to_string(),
            }),
        ));
    }
    match state.engine.cache().invalidate_tag(tag).await {
        Ok(invalidated) => Ok(Json(InvalidateResponse {
            tag: tag.to_string(),
            invalidated,
        })),
        Err(e) => {
            tracing::error!("Invalidation of tag {} failed: {}", tag, e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody { error: e.to_string() }),
            ))
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/invalidate", post(invalidate))
        .with_state(state)
}
