//! Router assembly: API groups, static files, CORS, and HTTP tracing.

use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::{
    cors::{Any, CorsLayer},
    services::{ServeDir, ServeFile},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::state::AppState;

pub mod admin;
pub mod auth;
pub mod budget;
pub mod http;
pub mod scenarios;

/// Build the application router with:
/// - auth, budget and scenario APIs under `/api/v1/...`
/// - admin scenario management and cache control under `/api/admin/...`
/// - Static SPA from the configured static dir with index fallback
/// - CORS (allow any origin/method/headers); adjust for production if needed
/// - HTTP trace layer (per-request spans w/ method, path, status, latency)
pub fn build_router(state: Arc<AppState>) -> Router {
    let static_dir = state.config.server.static_dir.clone();
    let static_service = ServeDir::new(&static_dir)
        .append_index_html_on_directories(true)
        .not_found_service(ServeFile::new(format!("{}/index.html", static_dir.trim_end_matches('/'))));

    Router::new()
        .route("/api/v1/health", get(http::http_health))
        .nest("/api/v1/auth", auth::router())
        .nest("/api/v1/budget", budget::router())
        .nest("/api/v1/scenarios", scenarios::router())
        .nest("/api/admin/scenario-management", admin::scenario_router())
        .nest("/api/admin/cache", admin::cache_router())
        // State + CORS + HTTP tracing
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        // Frontend fallback
        .fallback_service(static_service)
}
