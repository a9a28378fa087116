//! `/api/v1/budget`: per-user budget status, settings, resets and admin controls.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use tracing::{info, instrument};

use crate::auth::{require_admin, AuthUser};
use crate::budget::{alerts, has_permission, recommended_strategy, BudgetPermission, BudgetSettings};
use crate::db::budget::BudgetResetLog;
use crate::error::{ApiError, ApiResult};
use crate::logic::{
    apply_admin_configure, apply_settings_update, budget_snapshot, require_budget_permission, reset_budget_period,
    usage_breakdown,
};
use crate::protocol::{
    AdminConfigureIn, AlertsOut, BudgetSettingsUpdate, BudgetStatusOut, HistoryQuery, ResetIn, ResetOut, UsageBreakdown,
};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/status", get(status))
        .route("/settings", get(get_settings).put(update_settings))
        .route("/reset", post(reset))
        .route("/usage/breakdown", get(breakdown))
        .route("/history", get(history))
        .route("/alerts", get(get_alerts))
        .route("/admin/configure", put(admin_configure))
        .route("/admin/users", get(admin_list))
        .route("/admin/reset/:user_id", post(admin_reset))
}

#[instrument(level = "info", skip_all, fields(user_id = %user.user_id))]
pub async fn status(State(state): State<Arc<AppState>>, AuthUser(user): AuthUser) -> ApiResult<Json<BudgetStatusOut>> {
    let (settings, status) = budget_snapshot(&state, &user)?;
    require_budget_permission(&user, &settings, BudgetPermission::View)?;
    Ok(Json(BudgetStatusOut {
        user_id: user.user_id.clone(),
        status,
        can_view_budget: true,
        can_modify_limit: has_permission(user.role, &settings, BudgetPermission::Modify),
        can_reset_budget: has_permission(user.role, &settings, BudgetPermission::Reset),
    }))
}

#[instrument(level = "info", skip_all, fields(user_id = %user.user_id))]
pub async fn get_settings(State(state): State<Arc<AppState>>, AuthUser(user): AuthUser) -> ApiResult<Json<BudgetSettings>> {
    let settings = state.db.get_or_create_budget_settings(&user.user_id, &state.config.budget)?;
    require_budget_permission(&user, &settings, BudgetPermission::View)?;
    Ok(Json(settings))
}

#[instrument(level = "info", skip_all, fields(user_id = %user.user_id))]
pub async fn update_settings(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(body): Json<BudgetSettingsUpdate>,
) -> ApiResult<Json<BudgetSettings>> {
    let mut settings = state.db.get_or_create_budget_settings(&user.user_id, &state.config.budget)?;
    require_budget_permission(&user, &settings, BudgetPermission::Modify)?;
    apply_settings_update(&mut settings, &body, Utc::now())?;
    state.db.save_budget_settings(&settings)?;
    info!(target: "budget", user_id = %user.user_id, limit = settings.effective_limit(), period = settings.budget_period.as_str(), "Budget settings updated");
    Ok(Json(settings))
}

#[instrument(level = "info", skip_all, fields(user_id = %user.user_id))]
pub async fn reset(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    body: Option<Json<ResetIn>>,
) -> ApiResult<Json<ResetOut>> {
    let settings = state.db.get_or_create_budget_settings(&user.user_id, &state.config.budget)?;
    require_budget_permission(&user, &settings, BudgetPermission::Reset)?;
    let reason = body.and_then(|Json(b)| b.reason);
    Ok(Json(reset_budget_period(&state, &user, None, reason)?))
}

#[instrument(level = "info", skip_all, fields(user_id = %user.user_id))]
pub async fn breakdown(State(state): State<Arc<AppState>>, AuthUser(user): AuthUser) -> ApiResult<Json<UsageBreakdown>> {
    let settings = state.db.get_or_create_budget_settings(&user.user_id, &state.config.budget)?;
    require_budget_permission(&user, &settings, BudgetPermission::View)?;
    Ok(Json(usage_breakdown(&state, &user, &settings)?))
}

#[instrument(level = "info", skip_all, fields(user_id = %user.user_id))]
pub async fn history(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Query(q): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<BudgetResetLog>>> {
    let limit = q.limit.unwrap_or(20);
    if !(1..=100).contains(&limit) {
        return Err(ApiError::BadRequest("limit must be between 1 and 100".into()));
    }
    let settings = state.db.get_or_create_budget_settings(&user.user_id, &state.config.budget)?;
    require_budget_permission(&user, &settings, BudgetPermission::View)?;
    Ok(Json(state.db.list_reset_logs(&user.user_id, limit)?))
}

#[instrument(level = "info", skip_all, fields(user_id = %user.user_id))]
pub async fn get_alerts(State(state): State<Arc<AppState>>, AuthUser(user): AuthUser) -> ApiResult<Json<AlertsOut>> {
    let (settings, status) = budget_snapshot(&state, &user)?;
    require_budget_permission(&user, &settings, BudgetPermission::View)?;
    Ok(Json(AlertsOut {
        alert_level: status.alert_level,
        percentage_used: status.percentage_used,
        alerts: alerts(&status),
        recommended_strategy: recommended_strategy(&status),
    }))
}

// ---------- Admin ----------

#[instrument(level = "info", skip_all, fields(admin = %admin.user_id, target = %body.target_user_id))]
pub async fn admin_configure(
    State(state): State<Arc<AppState>>,
    AuthUser(admin): AuthUser,
    Json(body): Json<AdminConfigureIn>,
) -> ApiResult<Json<BudgetSettings>> {
    require_admin(&admin)?;
    if state.db.get_user(&body.target_user_id)?.is_none() {
        return Err(ApiError::NotFound("User not found".into()));
    }
    let mut settings = state.db.get_or_create_budget_settings(&body.target_user_id, &state.config.budget)?;
    apply_admin_configure(&mut settings, &body, &admin.user_id, Utc::now())?;
    state.db.save_budget_settings(&settings)?;
    info!(target: "budget", admin = %admin.user_id, target = %body.target_user_id, "Budget configured by admin");
    Ok(Json(settings))
}

#[instrument(level = "info", skip_all, fields(admin = %admin.user_id))]
pub async fn admin_list(State(state): State<Arc<AppState>>, AuthUser(admin): AuthUser) -> ApiResult<Json<Vec<BudgetSettings>>> {
    require_admin(&admin)?;
    Ok(Json(state.db.list_budget_settings()?))
}

#[instrument(level = "info", skip(state, admin, body), fields(admin = %admin.user_id))]
pub async fn admin_reset(
    State(state): State<Arc<AppState>>,
    AuthUser(admin): AuthUser,
    Path(user_id): Path<String>,
    body: Option<Json<ResetIn>>,
) -> ApiResult<Json<ResetOut>> {
    require_admin(&admin)?;
    let target = state
        .db
        .get_user(&user_id)?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;
    let reason = body.and_then(|Json(b)| b.reason);
    Ok(Json(reset_budget_period(&state, &target, Some(&admin.user_id), reason)?))
}
