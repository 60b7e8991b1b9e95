//! Resolution cache routes.

use axum::{Json, Router, extract::State, routing::{get, post}};
use serde::Serialize;

use crate::api::server::AppState;
use crate::resolution::ResolutionStatus;

#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub cleared: usize,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/status", get(status))
        .route("/clear", post(clear))
}

async fn status(State(state): State<AppState>) -> Json<ResolutionStatus> {
    Json(state.services.resolution.status())
}

async fn clear(State(state): State<AppState>) -> Json<ClearResponse> {
    Json(ClearResponse {
        cleared: state.services.resolution.clear_cache(),
    })
}
