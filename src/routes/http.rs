//! Service-level endpoints.

use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, Json};
use tracing::instrument;

use crate::protocol::HealthOut;
use crate::state::AppState;

#[instrument(level = "info", skip(state))]
pub async fn http_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthOut { ok: true, openai: state.openai.is_some() })
}
