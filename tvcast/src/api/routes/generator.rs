//! Generator administration routes.
//!
//! `POST /api/generator` drives the playlist generator and
//! `POST /api/resolver` drives the resolver, both with the same
//! `{action, url?, interval?}` body. `GET /api/resolver/download-template`
//! hands out the installed resolver script.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::header,
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::Error;
use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::generator::{GeneratorRole, GeneratorStatus, ManagedGenerator};
use crate::playlist::{PlaylistSource, RebuildOptions};
use crate::services::ServiceContainer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GeneratorAction {
    Download,
    Execute,
    Status,
    CheckHealth,
    Schedule,
    #[serde(alias = "stopSchedule")]
    StopSchedule,
    ClearCache,
}

#[derive(Debug, Deserialize)]
pub struct GeneratorRequest {
    pub action: GeneratorAction,
    pub url: Option<String>,
    pub interval: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GeneratorResponse {
    pub success: bool,
    pub message: String,
    pub status: GeneratorStatus,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/generator", post(playlist_generator))
        .route("/api/resolver", post(resolver))
        .route("/api/resolver/download-template", get(resolver_template))
}

async fn playlist_generator(
    State(state): State<AppState>,
    Json(request): Json<GeneratorRequest>,
) -> ApiResult<Json<GeneratorResponse>> {
    handle(&state.services, GeneratorRole::Playlist, request).await
}

async fn resolver(
    State(state): State<AppState>,
    Json(request): Json<GeneratorRequest>,
) -> ApiResult<Json<GeneratorResponse>> {
    handle(&state.services, GeneratorRole::Resolver, request).await
}

/// Installed resolver script as an attachment.
async fn resolver_template(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    const MISSING: &str = "No resolver script installed";

    let resolver = state.services.generators.resolver();
    if !resolver.has_artifact() {
        return Err(ApiError::not_found(MISSING));
    }

    let path = resolver.artifact_path();
    let script = match tokio::fs::read(path).await {
        Ok(script) => script,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::not_found(MISSING));
        }
        Err(e) => return Err(Error::io_path("reading resolver script", path, e).into()),
    };

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "resolver_script".to_string());
    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{file_name}\""),
            ),
        ],
        script,
    ))
}

async fn handle(
    services: &Arc<ServiceContainer>,
    role: GeneratorRole,
    request: GeneratorRequest,
) -> ApiResult<Json<GeneratorResponse>> {
    let generator = services.generators.get(role);
    info!(role = %role, action = ?request.action, "Generator action requested");

    let message = match request.action {
        GeneratorAction::Download => {
            let url = request
                .url
                .as_deref()
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .ok_or_else(|| ApiError::bad_request("url is required"))?;
            generator.acquire(url).await?;
            if role == GeneratorRole::Resolver {
                services.resolution.clear_cache();
            }
            format!("Script downloaded from {url}")
        }
        GeneratorAction::Execute => execute(services, generator, role).await?,
        GeneratorAction::Status => "Status retrieved".to_string(),
        GeneratorAction::CheckHealth => {
            if generator.validate().await? {
                "Health check passed".to_string()
            } else {
                return Ok(respond(false, "Health check failed", generator));
            }
        }
        GeneratorAction::Schedule => {
            let interval = request
                .interval
                .as_deref()
                .ok_or_else(|| ApiError::bad_request("interval is required"))?;
            if !generator.schedule_recurring(interval) {
                let reason = generator.status().last_error.unwrap_or_default();
                return Err(ApiError::validation(reason));
            }
            format!("Scheduled every {interval}")
        }
        GeneratorAction::StopSchedule => {
            if generator.cancel_schedule() {
                "Schedule stopped".to_string()
            } else {
                "No schedule was active".to_string()
            }
        }
        GeneratorAction::ClearCache => {
            let cleared = generator.clear_produced_cache();
            let mut message = if cleared {
                "Cached output cleared".to_string()
            } else {
                "Nothing to clear".to_string()
            };
            if role == GeneratorRole::Resolver {
                let entries = services.resolution.clear_cache();
                message.push_str(&format!(", {entries} resolved streams dropped"));
            }
            message
        }
    };

    Ok(respond(true, message, generator))
}

/// Run the generator; a playlist run also republishes the catalog from
/// its output.
async fn execute(
    services: &Arc<ServiceContainer>,
    generator: &Arc<ManagedGenerator>,
    role: GeneratorRole,
) -> ApiResult<String> {
    let output = generator.execute(&[]).await?;
    if role == GeneratorRole::Resolver {
        return Ok(format!("Resolver executed ({} bytes of output)", output.len()));
    }

    services.playlist.set_source(PlaylistSource::GeneratorOutput);
    let outcome = services
        .playlist
        .rebuild(PlaylistSource::GeneratorOutput, RebuildOptions::forced())
        .await?;
    Ok(format!(
        "Generator executed, {} channels loaded",
        outcome.entry().channels.len()
    ))
}

fn respond(
    success: bool,
    message: impl Into<String>,
    generator: &ManagedGenerator,
) -> Json<GeneratorResponse> {
    Json(GeneratorResponse {
        success,
        message: message.into(),
        status: generator.status(),
    })
}
