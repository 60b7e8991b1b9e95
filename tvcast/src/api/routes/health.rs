//! Health check routes.

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use crate::api::server::AppState;
use crate::services::ServiceStats;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    #[serde(flatten)]
    pub stats: ServiceStats,
}

/// Create the health router.
pub fn router() -> Router<AppState> {
    Router::new().route("/", get(health_check))
}

/// Always 200 while the process serves requests; a stale catalog is
/// reported as `degraded`.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.services.stats();
    let status = if stats.playlist.stale { "degraded" } else { "healthy" };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.start_time.elapsed().as_secs(),
        stats,
    })
}
