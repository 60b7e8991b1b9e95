//! API route modules.
//!
//! Organizes routes by resource type.

pub mod catalog;
pub mod configure;
pub mod generator;
pub mod health;
pub mod logging;
pub mod resolution;

use axum::Router;

use crate::api::server::AppState;

/// Create the main API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(catalog::router())
        .merge(configure::router())
        .merge(generator::router())
        .nest("/api/resolution", resolution::router())
        .nest("/api/logging", logging::router())
        .nest("/health", health::router())
        .with_state(state)
}
