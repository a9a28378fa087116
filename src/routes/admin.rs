//! Admin-only routers: scenario definitions CRUD and response cache control.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use tracing::{info, instrument};

use crate::auth::{require_admin, AuthUser};
use crate::cache::CacheStats;
use crate::domain::ConversationScenario;
use crate::error::{ApiError, ApiResult};
use crate::protocol::{CacheClearOut, MessageOut, SetActiveIn, TierQuery};
use crate::scenarios::{ScenarioStatistics, TemplateSummary};
use crate::state::AppState;

/// Mounted at `/api/admin/scenario-management`.
pub fn scenario_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/scenarios", get(list_scenarios).post(create_scenario))
        .route(
            "/scenarios/:scenario_id",
            get(get_scenario).put(update_scenario).delete(delete_scenario),
        )
        .route("/scenarios/:scenario_id/active", post(set_active))
        .route("/templates", get(list_templates))
        .route("/statistics", get(statistics))
}

/// Mounted at `/api/admin/cache`.
pub fn cache_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/stats", get(cache_stats))
        .route("/clear", post(cache_clear))
        .route("/clear-expired", post(cache_clear_expired))
}

// ---------- Scenario management ----------

#[instrument(level = "info", skip_all, fields(admin = %admin.user_id))]
pub async fn list_scenarios(
    State(state): State<Arc<AppState>>,
    AuthUser(admin): AuthUser,
) -> ApiResult<Json<Vec<ConversationScenario>>> {
    require_admin(&admin)?;
    Ok(Json(state.scenarios.all().await))
}

#[instrument(level = "info", skip(state, admin), fields(admin = %admin.user_id))]
pub async fn get_scenario(
    State(state): State<Arc<AppState>>,
    AuthUser(admin): AuthUser,
    Path(scenario_id): Path<String>,
) -> ApiResult<Json<ConversationScenario>> {
    require_admin(&admin)?;
    state
        .scenarios
        .get(&scenario_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Scenario not found".into()))
}

#[instrument(level = "info", skip_all, fields(admin = %admin.user_id, scenario_id = %scenario.scenario_id))]
pub async fn create_scenario(
    State(state): State<Arc<AppState>>,
    AuthUser(admin): AuthUser,
    Json(scenario): Json<ConversationScenario>,
) -> ApiResult<Json<ConversationScenario>> {
    require_admin(&admin)?;
    Ok(Json(state.scenarios.save(scenario).await?))
}

#[instrument(level = "info", skip(state, admin, scenario), fields(admin = %admin.user_id))]
pub async fn update_scenario(
    State(state): State<Arc<AppState>>,
    AuthUser(admin): AuthUser,
    Path(scenario_id): Path<String>,
    Json(scenario): Json<ConversationScenario>,
) -> ApiResult<Json<ConversationScenario>> {
    require_admin(&admin)?;
    Ok(Json(state.scenarios.update(&scenario_id, scenario).await?))
}

#[instrument(level = "info", skip(state, admin), fields(admin = %admin.user_id))]
pub async fn delete_scenario(
    State(state): State<Arc<AppState>>,
    AuthUser(admin): AuthUser,
    Path(scenario_id): Path<String>,
) -> ApiResult<Json<MessageOut>> {
    require_admin(&admin)?;
    if !state.scenarios.delete(&scenario_id).await {
        return Err(ApiError::NotFound("Scenario not found".into()));
    }
    Ok(Json(MessageOut::new(format!("Scenario {} deleted", scenario_id))))
}

#[instrument(level = "info", skip(state, admin, body), fields(admin = %admin.user_id))]
pub async fn set_active(
    State(state): State<Arc<AppState>>,
    AuthUser(admin): AuthUser,
    Path(scenario_id): Path<String>,
    Json(body): Json<SetActiveIn>,
) -> ApiResult<Json<MessageOut>> {
    require_admin(&admin)?;
    if !state.scenarios.set_active(&scenario_id, body.is_active).await {
        return Err(ApiError::NotFound("Scenario not found".into()));
    }
    let verb = if body.is_active { "activated" } else { "deactivated" };
    Ok(Json(MessageOut::new(format!("Scenario {} {}", scenario_id, verb))))
}

pub async fn list_templates(
    State(state): State<Arc<AppState>>,
    AuthUser(admin): AuthUser,
    Query(q): Query<TierQuery>,
) -> ApiResult<Json<Vec<TemplateSummary>>> {
    require_admin(&admin)?;
    Ok(Json(state.scenarios.universal_templates(q.tier)))
}

pub async fn statistics(
    State(state): State<Arc<AppState>>,
    AuthUser(admin): AuthUser,
) -> ApiResult<Json<ScenarioStatistics>> {
    require_admin(&admin)?;
    Ok(Json(state.scenarios.statistics().await))
}

// ---------- Cache ----------

pub async fn cache_stats(State(state): State<Arc<AppState>>, AuthUser(admin): AuthUser) -> ApiResult<Json<CacheStats>> {
    require_admin(&admin)?;
    Ok(Json(state.cache.lock().await.stats()))
}

#[instrument(level = "info", skip_all, fields(admin = %admin.user_id))]
pub async fn cache_clear(State(state): State<Arc<AppState>>, AuthUser(admin): AuthUser) -> ApiResult<Json<CacheClearOut>> {
    require_admin(&admin)?;
    let cleared = state.cache.lock().await.clear();
    info!(target: "cache", cleared, "Response cache cleared");
    Ok(Json(CacheClearOut { success: true, cleared }))
}

#[instrument(level = "info", skip_all, fields(admin = %admin.user_id))]
pub async fn cache_clear_expired(
    State(state): State<Arc<AppState>>,
    AuthUser(admin): AuthUser,
) -> ApiResult<Json<CacheClearOut>> {
    require_admin(&admin)?;
    let cleared = state.cache.lock().await.clear_expired();
    Ok(Json(CacheClearOut { success: true, cleared }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::http::StatusCode;
    use serde_json::json;

    use crate::routes::build_router;
    use crate::routes::test_support::{register, send};
    use crate::state::AppState;

    const BASE: &str = "/api/admin/scenario-management";

    #[tokio::test]
    async fn non_admins_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(Arc::new(AppState::for_tests(dir.path())));
        let _admin = register(&app, "root", "admin").await;
        let kid = register(&app, "kid", "child").await;

        for uri in [format!("{}/scenarios", BASE), format!("{}/statistics", BASE), "/api/admin/cache/stats".to_string()] {
            let (status, body) = send(&app, "GET", &uri, Some(&kid), None).await;
            assert_eq!(status, StatusCode::FORBIDDEN, "{uri}");
            assert_eq!(body["detail"], "Admin access required");
        }
        let (status, _) = send(&app, "GET", &format!("{}/scenarios", BASE), None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn scenario_crud_persists_and_toggles() {
        let dir = tempfile::tempdir().unwrap();
        let state = Arc::new(AppState::for_tests(dir.path()));
        let app = build_router(state.clone());
        let admin = register(&app, "root", "admin").await;
        let kid = register(&app, "kid", "child").await;

        let (status, mut scenario) =
            send(&app, "GET", &format!("{}/scenarios/hotel_check_in", BASE), Some(&admin), None).await;
        assert_eq!(status, StatusCode::OK);

        scenario["scenario_id"] = json!("hotel_late_arrival");
        scenario["name"] = json!("Late Hotel Arrival");
        let (status, body) = send(&app, "POST", &format!("{}/scenarios", BASE), Some(&admin), Some(scenario.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "Late Hotel Arrival");
        assert!(dir.path().join("scenarios.json").exists());

        scenario["name"] = json!("Very Late Hotel Arrival");
        scenario["scenario_id"] = json!("ignored_body_id");
        let (status, body) = send(
            &app,
            "PUT",
            &format!("{}/scenarios/hotel_late_arrival", BASE),
            Some(&admin),
            Some(scenario.clone()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["scenario_id"], "hotel_late_arrival");
        let (status, _) =
            send(&app, "PUT", &format!("{}/scenarios/missing", BASE), Some(&admin), Some(scenario.clone())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        scenario["phases"] = json!([]);
        let (status, _) = send(&app, "POST", &format!("{}/scenarios", BASE), Some(&admin), Some(scenario)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &app,
            "POST",
            &format!("{}/scenarios/hotel_late_arrival/active", BASE),
            Some(&admin),
            Some(json!({"is_active": false})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(
            &app,
            "POST",
            "/api/v1/scenarios/start",
            Some(&kid),
            Some(json!({"scenario_id": "hotel_late_arrival"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, stats) = send(&app, "GET", &format!("{}/statistics", BASE), Some(&admin), None).await;
        assert_eq!(stats["total_scenarios"], 4);

        let (status, _) = send(&app, "DELETE", &format!("{}/scenarios/hotel_late_arrival", BASE), Some(&admin), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&app, "DELETE", &format!("{}/scenarios/hotel_late_arrival", BASE), Some(&admin), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(state.scenarios.get("hotel_late_arrival").await.is_none());
    }

    #[tokio::test]
    async fn cache_endpoints_report_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let state = Arc::new(AppState::for_tests(dir.path()));
        let app = build_router(state.clone());
        let admin = register(&app, "root", "admin").await;

        state.cache.lock().await.set(&["hello"], "en", "Hello there! How can I help you today?", "openai", None);
        let (status, stats) = send(&app, "GET", "/api/admin/cache/stats", Some(&admin), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stats["entries"], 1);

        let (_, body) = send(&app, "POST", "/api/admin/cache/clear-expired", Some(&admin), None).await;
        assert_eq!(body["cleared"], 0);
        let (_, body) = send(&app, "POST", "/api/admin/cache/clear", Some(&admin), None).await;
        assert_eq!(body["cleared"], 1);
    }
}
