//! Addon configuration and playlist rebuild routes.

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::post,
};
use serde::{Deserialize, Serialize};

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::config::AddonConfig;
use crate::playlist::{PlaylistSource, RebuildOptions};
use crate::services::ConfigureReport;

#[derive(Debug, Deserialize)]
pub struct RebuildRequest {
    pub m3u: String,
}

#[derive(Debug, Serialize)]
pub struct RebuildResponse {
    pub success: bool,
    pub message: String,
    pub channels: usize,
    pub genres: usize,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/rebuild-cache", post(rebuild_cache))
        .route("/api/configure/{config}", post(configure))
}

/// Force a rebuild from a playlist URL.
async fn rebuild_cache(
    State(state): State<AppState>,
    Json(request): Json<RebuildRequest>,
) -> ApiResult<Json<RebuildResponse>> {
    let m3u = request.m3u.trim();
    let config = AddonConfig::from_pairs([("m3u".to_string(), m3u.to_string())])?;
    let url = config
        .m3u
        .ok_or_else(|| ApiError::bad_request("m3u URL is required"))?;

    let outcome = state
        .services
        .playlist
        .rebuild(PlaylistSource::Url(url), RebuildOptions::forced())
        .await?;
    let entry = outcome.entry();

    Ok(Json(RebuildResponse {
        success: true,
        message: format!("Playlist rebuilt from {}", entry.source_key),
        channels: entry.channels.len(),
        genres: entry.genres.len(),
    }))
}

/// Apply a base64-encoded addon configuration.
async fn configure(
    State(state): State<AppState>,
    Path(config): Path<String>,
) -> ApiResult<Json<ConfigureReport>> {
    let addon = AddonConfig::decode(&config)?;
    Ok(Json(state.services.apply_addon_config(&addon).await))
}
