//! Catalog and stream routes.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::header,
    response::IntoResponse,
    routing::get,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Error;
use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::playlist::Channel;

#[derive(Debug, Deserialize)]
pub struct CatalogQuery {
    pub genre: Option<String>,
    /// Case-insensitive substring of the channel name.
    pub search: Option<String>,
    /// Number of matching channels to leave out from the start.
    #[serde(default)]
    pub skip: usize,
}

#[derive(Debug, Serialize)]
pub struct CatalogResponse {
    pub source_key: Option<String>,
    pub built_at: Option<DateTime<Utc>>,
    pub stale: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice: Option<String>,
    pub genres: Vec<String>,
    pub epg_references: Vec<String>,
    pub channels: Vec<Channel>,
}

#[derive(Debug, Serialize)]
pub struct StreamResponse {
    pub id: String,
    pub name: Option<String>,
    pub url: String,
    /// Whether the URL came from the resolver rather than the catalog.
    pub resolved: bool,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/catalog", get(get_catalog))
        .route("/stream/{id}", get(get_stream))
        .route("/generated-m3u", get(get_generated_m3u))
}

/// Current catalog, possibly stale. Never fails; an unbuilt catalog is
/// returned empty.
///
/// Channels are filtered by genre, then by name, then offset by `skip`.
async fn get_catalog(
    State(state): State<AppState>,
    Query(query): Query<CatalogQuery>,
) -> Json<CatalogResponse> {
    let snapshot = state.services.playlist.get();
    let notice = snapshot.notice();

    let Some(entry) = snapshot.entry else {
        return Json(CatalogResponse {
            source_key: None,
            built_at: None,
            stale: false,
            notice: None,
            genres: Vec::new(),
            epg_references: Vec::new(),
            channels: Vec::new(),
        });
    };

    let channels = entry
        .find_channels(query.genre.as_deref(), query.search.as_deref())
        .skip(query.skip)
        .cloned()
        .collect();

    Json(CatalogResponse {
        source_key: Some(entry.source_key.clone()),
        built_at: Some(entry.built_at),
        stale: snapshot.stale,
        notice,
        genres: entry.genres.clone(),
        epg_references: entry.epg_references.clone(),
        channels,
    })
}

/// Playable URL for a channel.
///
/// Goes through the resolver when a resolver script is installed and falls
/// back to the catalog's own stream reference otherwise.
async fn get_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<StreamResponse>> {
    let services = &state.services;
    let channel = services.playlist.get().channel(&id).cloned();

    if services.generators.resolver().has_artifact() {
        let url = services.resolution.resolve(&id).await?;
        return Ok(Json(StreamResponse {
            id,
            name: channel.map(|c| c.name),
            url: url.to_string(),
            resolved: true,
        }));
    }

    let channel = channel.ok_or_else(|| Error::resolution(&id, "unknown channel"))?;
    Ok(Json(StreamResponse {
        id,
        name: Some(channel.name),
        url: channel.stream_url,
        resolved: false,
    }))
}

/// Last document printed by the playlist generator.
async fn get_generated_m3u(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let output: Arc<str> = state
        .services
        .generators
        .playlist()
        .last_output()
        .ok_or_else(|| ApiError::not_found("No generated playlist available"))?;

    Ok((
        [(header::CONTENT_TYPE, "application/x-mpegurl; charset=utf-8")],
        output.to_string(),
    ))
}
