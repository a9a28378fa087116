//! `/api/v1/scenarios`: browsing, template stamping and role-play sessions.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tracing::{info, instrument, warn};

use crate::auth::AuthUser;
use crate::domain::{ConversationRole, ConversationScenario, ScenarioCategory, ScenarioDifficulty, User};
use crate::error::{ApiError, ApiResult};
use crate::logic::scenario_reply;
use crate::protocol::{
    CreateFromTemplateIn, Envelope, ScenarioListQuery, ScenarioMessageIn, ScenarioMessageOut, StartScenarioIn, TierQuery,
};
use crate::scenarios::{CategoryInfo, CategoryListing, CompletionSummary, ProgressReport, StartedScenario, TemplateSummary};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list))
        .route("/categories", get(categories))
        .route("/templates", get(templates))
        .route("/templates/tier1", get(tier1_templates))
        .route("/templates/create", post(create_from_template))
        .route("/category/:name", get(by_category))
        .route("/start", post(start))
        .route("/message", post(message))
        .route("/progress/:progress_id", get(progress))
        .route("/complete/:progress_id", post(complete))
        .route("/:scenario_id", get(details))
}

fn valid_values<T: Copy>(all: &[T], as_str: fn(&T) -> &'static str) -> String {
    all.iter().map(as_str).collect::<Vec<_>>().join(", ")
}

fn parse_category(raw: &str) -> ApiResult<ScenarioCategory> {
    ScenarioCategory::parse(raw).ok_or_else(|| {
        ApiError::BadRequest(format!(
            "Invalid category. Valid options: {}",
            valid_values(ScenarioCategory::ALL, ScenarioCategory::as_str)
        ))
    })
}

fn parse_difficulty(raw: &str) -> ApiResult<ScenarioDifficulty> {
    ScenarioDifficulty::parse(raw).ok_or_else(|| {
        ApiError::BadRequest(format!(
            "Invalid difficulty. Valid options: {}",
            valid_values(ScenarioDifficulty::ALL, ScenarioDifficulty::as_str)
        ))
    })
}

fn parse_role(raw: &str) -> ApiResult<ConversationRole> {
    ConversationRole::parse(raw).ok_or_else(|| {
        ApiError::BadRequest(format!(
            "Invalid role. Valid options: {}",
            valid_values(ConversationRole::ALL, ConversationRole::as_str)
        ))
    })
}

/// 404 for an unknown session, 403 when it belongs to someone else.
async fn ensure_owner(state: &AppState, user: &User, progress_id: &str) -> ApiResult<()> {
    match state.scenarios.owner_of(progress_id).await {
        None => Err(ApiError::NotFound("Scenario progress not found".into())),
        Some(owner) if owner != user.user_id => {
            warn!(target: "scenario", user_id = %user.user_id, %progress_id, "Access to foreign session denied");
            Err(ApiError::Forbidden("Access denied to this scenario session".into()))
        }
        Some(_) => Ok(()),
    }
}

#[instrument(level = "info", skip_all, fields(user_id = %user.user_id))]
pub async fn list(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Query(q): Query<ScenarioListQuery>,
) -> ApiResult<Json<Envelope<Value>>> {
    let category = q.category.as_deref().map(parse_category).transpose()?;
    let difficulty = q.difficulty.as_deref().map(parse_difficulty).transpose()?;
    let scenarios = state.scenarios.list_available(category, difficulty).await;
    Ok(Json(Envelope::ok(json!({
        "total_count": scenarios.len(),
        "scenarios": scenarios,
        "categories": ScenarioCategory::ALL,
        "difficulties": ScenarioDifficulty::ALL,
    }))))
}

/// Public: lets the frontend render category tiles before login.
pub async fn categories(State(state): State<Arc<AppState>>) -> Json<Envelope<Vec<CategoryInfo>>> {
    Json(Envelope::ok(state.scenarios.categories().await))
}

#[instrument(level = "info", skip_all, fields(user_id = %user.user_id))]
pub async fn templates(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Query(q): Query<TierQuery>,
) -> ApiResult<Json<Envelope<Vec<TemplateSummary>>>> {
    if let Some(tier) = q.tier {
        if !(1..=6).contains(&tier) {
            return Err(ApiError::BadRequest("tier must be between 1 and 6".into()));
        }
    }
    Ok(Json(Envelope::ok(state.scenarios.universal_templates(q.tier))))
}

pub async fn tier1_templates(
    State(state): State<Arc<AppState>>,
    AuthUser(_user): AuthUser,
) -> Json<Envelope<Vec<TemplateSummary>>> {
    let list = state.scenarios.universal_templates(Some(1));
    let n = list.len();
    Json(Envelope::with_message(list, format!("{} essential tier 1 templates", n)))
}

#[instrument(level = "info", skip_all, fields(user_id = %user.user_id, template_id = %body.template_id))]
pub async fn create_from_template(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(body): Json<CreateFromTemplateIn>,
) -> ApiResult<Json<Envelope<ConversationScenario>>> {
    let difficulty = parse_difficulty(&body.difficulty)?;
    let user_role = parse_role(&body.user_role)?;
    let ai_role = parse_role(&body.ai_role)?;
    let scenario = state
        .scenarios
        .create_from_template(&body.template_id, difficulty, user_role, ai_role, body.variation_id.as_deref())
        .await?;
    let msg = format!("Created scenario from template {}", body.template_id);
    Ok(Json(Envelope::with_message(scenario, msg)))
}

#[instrument(level = "info", skip(state, user), fields(user_id = %user.user_id))]
pub async fn by_category(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(name): Path<String>,
) -> ApiResult<Json<Envelope<CategoryListing>>> {
    let category = parse_category(&name)?;
    Ok(Json(Envelope::ok(state.scenarios.by_category(category).await)))
}

#[instrument(level = "info", skip(state, user), fields(user_id = %user.user_id))]
pub async fn details(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(scenario_id): Path<String>,
) -> ApiResult<Json<Envelope<ConversationScenario>>> {
    let scenario = state
        .scenarios
        .details(&scenario_id)
        .await
        .ok_or_else(|| ApiError::NotFound("Scenario not found".into()))?;
    Ok(Json(Envelope::ok(scenario)))
}

#[instrument(level = "info", skip_all, fields(user_id = %user.user_id, scenario_id = %body.scenario_id))]
pub async fn start(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(body): Json<StartScenarioIn>,
) -> ApiResult<Json<Envelope<StartedScenario>>> {
    let started = state.scenarios.start(&user.user_id, &body.scenario_id).await?;
    Ok(Json(Envelope::with_message(started, "Scenario started successfully")))
}

#[instrument(level = "info", skip_all, fields(user_id = %user.user_id, progress_id = %body.progress_id))]
pub async fn message(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(body): Json<ScenarioMessageIn>,
) -> ApiResult<Json<Envelope<ScenarioMessageOut>>> {
    let text = body.message.trim();
    if text.is_empty() {
        return Err(ApiError::BadRequest("message must not be empty".into()));
    }
    let ctx = state
        .scenarios
        .session_context(&body.progress_id)
        .await
        .ok_or_else(|| ApiError::NotFound("Scenario progress not found".into()))?;
    if ctx.user_id != user.user_id {
        warn!(target: "scenario", user_id = %user.user_id, progress_id = %body.progress_id, "Access to foreign session denied");
        return Err(ApiError::Forbidden("Access denied to this scenario session".into()));
    }

    let (ai_response, reply_source) = scenario_reply(&state, &user, &ctx, text).await?;
    let outcome = state.scenarios.process_message(&body.progress_id, text, &ai_response).await?;
    info!(
        target: "scenario",
        user_id = %user.user_id,
        source = ?reply_source,
        phase_complete = outcome.phase_completion.is_complete,
        score = outcome.phase_completion.completion_score,
        "Scenario turn processed"
    );
    Ok(Json(Envelope::ok(ScenarioMessageOut { ai_response, reply_source, progress: outcome })))
}

#[instrument(level = "info", skip(state, user), fields(user_id = %user.user_id))]
pub async fn progress(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(progress_id): Path<String>,
) -> ApiResult<Json<Envelope<ProgressReport>>> {
    ensure_owner(&state, &user, &progress_id).await?;
    let report = state
        .scenarios
        .progress(&progress_id)
        .await
        .ok_or_else(|| ApiError::NotFound("Scenario progress not found".into()))?;
    Ok(Json(Envelope::ok(report)))
}

#[instrument(level = "info", skip(state, user), fields(user_id = %user.user_id))]
pub async fn complete(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(progress_id): Path<String>,
) -> ApiResult<Json<Envelope<CompletionSummary>>> {
    ensure_owner(&state, &user, &progress_id).await?;
    let summary = state.scenarios.complete(&progress_id).await?;
    Ok(Json(Envelope::with_message(summary, "Scenario completed successfully")))
}
