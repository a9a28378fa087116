//! Core behaviors shared by the HTTP handlers.
//!
//! This includes:
//!   - Budget snapshots, settings updates, period resets and usage breakdowns
//!   - The scenario reply path: cache, budget gate, OpenAI, local fallback

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, instrument, warn};

use crate::budget::{
  calculate_period_end, can_afford, compute_status, estimate_cost, has_permission, AlertLevel, BudgetPeriod,
  BudgetPermission, BudgetSettings, BudgetStatus, CostEstimate, UsageAmount,
};
use crate::db::budget::PeriodReset;
use crate::db::usage::NewUsage;
use crate::domain::User;
use crate::error::{ApiError, ApiResult};
use crate::openai::Usage;
use crate::protocol::{
  AdminConfigureIn, BudgetSettingsUpdate, DayUsage, ReplySource, ResetOut, TopOperation, UsageBreakdown,
};
use crate::scenarios::SessionContext;
use crate::state::AppState;
use crate::util::{fill_template, trunc_for_log};

const MAX_LIMIT_USD: f64 = 10_000.0;
const MAX_ADMIN_NOTES: usize = 500;
/// Reply length assumed when estimating a call before it is made.
const EXPECTED_REPLY_TOKENS: u64 = 150;

// ---------- Budget ----------

/// Settings (created on first access) plus the status for the current period.
pub fn budget_snapshot(state: &AppState, user: &User) -> ApiResult<(BudgetSettings, BudgetStatus)> {
  let settings = state.db.get_or_create_budget_settings(&user.user_id, &state.config.budget)?;
  let spent = state.db.sum_cost_since(user.id, settings.current_period_start)?;
  let status = compute_status(&settings, spent, Utc::now());
  Ok((settings, status))
}

pub fn require_budget_permission(user: &User, settings: &BudgetSettings, permission: BudgetPermission) -> ApiResult<()> {
  if has_permission(user.role, settings, permission) {
    return Ok(());
  }
  let detail = match permission {
    BudgetPermission::View => "Budget visibility is disabled for your account",
    BudgetPermission::Modify => "You don't have permission to modify budget settings. Contact an administrator.",
    BudgetPermission::Reset => "You don't have permission to reset budget. Contact an administrator.",
  };
  Err(ApiError::Forbidden(detail.into()))
}

fn check_range(name: &str, value: f64, min: f64, max: f64) -> ApiResult<()> {
  if value.is_finite() && (min..=max).contains(&value) {
    Ok(())
  } else {
    Err(ApiError::BadRequest(format!("{} must be between {} and {}", name, min, max)))
  }
}

/// Validate and apply a partial settings update. On error `settings` is untouched.
pub fn apply_settings_update(settings: &mut BudgetSettings, update: &BudgetSettingsUpdate, now: DateTime<Utc>) -> ApiResult<()> {
  let mut next = settings.clone();

  if let Some(v) = update.monthly_limit_usd {
    check_range("monthly_limit_usd", v, 0.0, MAX_LIMIT_USD)?;
    next.monthly_limit_usd = v;
  }
  if let Some(v) = update.custom_limit_usd {
    check_range("custom_limit_usd", v, 0.0, MAX_LIMIT_USD)?;
    next.custom_limit_usd = Some(v);
  }
  if let Some(days) = update.custom_period_days {
    if !(1..=365).contains(&days) {
      return Err(ApiError::BadRequest("custom_period_days must be between 1 and 365".into()));
    }
    next.custom_period_days = Some(days);
  }
  if let Some(raw) = &update.budget_period {
    let period = BudgetPeriod::parse(raw)
      .ok_or_else(|| ApiError::BadRequest(format!("Invalid budget_period: {}", raw)))?;
    next.budget_period = period;
    next.current_period_end = Some(calculate_period_end(period, next.custom_period_days, now));
  }
  if let Some(v) = update.enforce_budget {
    next.enforce_budget = v;
  }
  if let Some(v) = update.allow_budget_override {
    next.allow_budget_override = v;
  }
  if let Some(v) = update.auto_fallback_to_local {
    next.auto_fallback_to_local = v;
  }
  for (name, value, slot) in [
    ("alert_threshold_yellow", update.alert_threshold_yellow, &mut next.alert_threshold_yellow),
    ("alert_threshold_orange", update.alert_threshold_orange, &mut next.alert_threshold_orange),
    ("alert_threshold_red", update.alert_threshold_red, &mut next.alert_threshold_red),
  ] {
    if let Some(v) = value {
      check_range(name, v, 0.0, 100.0)?;
      *slot = v;
    }
  }

  if !next.thresholds_ascending() {
    return Err(ApiError::BadRequest(
      "Invalid threshold values. Must satisfy: yellow < orange < red".into(),
    ));
  }

  next.updated_at = now;
  *settings = next;
  Ok(())
}

/// Admin-only fields: permission flags, base limit and notes.
pub fn apply_admin_configure(
  settings: &mut BudgetSettings,
  input: &AdminConfigureIn,
  admin_id: &str,
  now: DateTime<Utc>,
) -> ApiResult<()> {
  if let Some(v) = input.monthly_limit_usd {
    check_range("monthly_limit_usd", v, 0.0, MAX_LIMIT_USD)?;
  }
  if let Some(notes) = &input.admin_notes {
    if notes.chars().count() > MAX_ADMIN_NOTES {
      return Err(ApiError::BadRequest(format!("admin_notes must be at most {} characters", MAX_ADMIN_NOTES)));
    }
  }

  if let Some(v) = input.budget_visible_to_user {
    settings.budget_visible_to_user = v;
  }
  if let Some(v) = input.user_can_modify_limit {
    settings.user_can_modify_limit = v;
  }
  if let Some(v) = input.user_can_reset_budget {
    settings.user_can_reset_budget = v;
  }
  if let Some(v) = input.monthly_limit_usd {
    settings.monthly_limit_usd = v;
  }
  if let Some(notes) = &input.admin_notes {
    settings.admin_notes = Some(notes.clone());
  }
  settings.configured_by = Some(admin_id.to_string());
  settings.updated_at = now;
  Ok(())
}

/// Close the current period into a reset log and start a new one now.
/// `by_admin` is set when someone other than the owner performs the reset.
#[instrument(level = "info", skip(state, target, reason), fields(user_id = %target.user_id))]
pub fn reset_budget_period(
  state: &AppState,
  target: &User,
  by_admin: Option<&str>,
  reason: Option<String>,
) -> ApiResult<ResetOut> {
  let reset_by = by_admin.unwrap_or(target.user_id.as_str());
  let default_reason = match by_admin {
    Some(admin) => format!("Manual reset by admin {}", admin),
    None => "Manual reset by user".to_string(),
  };
  let reset = PeriodReset {
    user_pk: target.id,
    user_id: &target.user_id,
    reset_by,
    reason: reason.filter(|r| !r.trim().is_empty()).unwrap_or(default_reason),
  };
  let (_, log) = state.db.reset_budget_period(&reset, &state.config.budget, Utc::now())?;
  let previous_spent = log.previous_spent;

  info!(target: "budget", user_id = %target.user_id, %reset_by, previous_spent, "Budget period reset");
  Ok(ResetOut {
    success: true,
    message: match by_admin {
      Some(_) => format!("Budget reset successfully for user {}", target.user_id),
      None => "Budget reset successfully".into(),
    },
    reset_by: by_admin.map(str::to_string),
    new_period_start: log.new_period_start,
    new_period_end: log.new_period_end,
    previous_spent,
  })
}

pub fn usage_breakdown(state: &AppState, user: &User, settings: &BudgetSettings) -> ApiResult<UsageBreakdown> {
  let records = state.db.list_usage_since(user.id, settings.current_period_start)?;

  let mut by_provider: BTreeMap<String, f64> = BTreeMap::new();
  let mut by_service_type: BTreeMap<String, f64> = BTreeMap::new();
  let mut by_day: BTreeMap<String, DayUsage> = BTreeMap::new();
  for r in &records {
    *by_provider.entry(r.api_provider.clone()).or_insert(0.0) += r.estimated_cost;
    *by_service_type.entry(r.request_type.clone()).or_insert(0.0) += r.estimated_cost;
    let date = r.created_at.date_naive().to_string();
    let day = by_day.entry(date.clone()).or_insert(DayUsage { date, cost: 0.0, requests: 0 });
    day.cost += r.estimated_cost;
    day.requests += 1;
  }

  let mut top: Vec<TopOperation> = records
    .iter()
    .map(|r| TopOperation {
      timestamp: r.created_at,
      provider: r.api_provider.clone(),
      service_type: r.request_type.clone(),
      cost: r.estimated_cost,
      tokens_used: r.tokens_used,
    })
    .collect();
  top.sort_by(|a, b| b.cost.total_cmp(&a.cost));
  top.truncate(10);

  Ok(UsageBreakdown {
    user_id: user.user_id.clone(),
    period_start: settings.current_period_start,
    period_end: settings.current_period_end,
    total_spent: records.iter().fold(0.0, |acc, r| acc + r.estimated_cost),
    by_provider,
    by_service_type,
    by_day: by_day.into_values().collect(),
    top_expensive_operations: top,
  })
}

// ---------- Scenario replies ----------

/// Whether a paid provider call may go ahead for this user right now.
pub fn provider_allowed(settings: &BudgetSettings, status: &BudgetStatus, estimate: &CostEstimate) -> bool {
  let within_budget =
    !settings.enforce_budget || can_afford(status, estimate.estimated_cost, 0.1) || settings.allow_budget_override;
  let fallback_forced = settings.auto_fallback_to_local && status.alert_level >= AlertLevel::Red;
  within_budget && !fallback_forced
}

fn roleplay_prompt(template: &str, ctx: &SessionContext) -> String {
  let scenario = &ctx.scenario;
  let (phase, phase_description, vocabulary) = match scenario.phases.get(ctx.phase_index) {
    Some(p) => (p.name.as_str(), p.description.as_str(), p.key_vocabulary.join(", ")),
    None => ("", "", String::new()),
  };
  let ai_role = scenario.ai_role.as_str().replace('_', " ");
  let user_role = scenario.user_role.as_str().replace('_', " ");
  fill_template(
    template,
    &[
      ("ai_role", &ai_role),
      ("user_role", &user_role),
      ("scenario", &scenario.name),
      ("setting", &scenario.setting),
      ("phase", phase),
      ("phase_description", phase_description),
      ("vocabulary", &vocabulary),
    ],
  )
}

/// Offline reply built from the current phase's phrases and vocabulary.
pub fn local_reply(ctx: &SessionContext, message: &str) -> String {
  let Some(phase) = ctx.scenario.phases.get(ctx.phase_index) else {
    return "Let's continue our conversation.".into();
  };
  let opener = if message.trim_end().ends_with('?') { "Good question." } else { "I see." };
  let mut reply = opener.to_string();

  if !phase.essential_phrases.is_empty() {
    let pick = message.split_whitespace().count() % phase.essential_phrases.len();
    let phrase = phase.essential_phrases[pick].trim_end_matches("...").trim_end();
    reply.push(' ');
    reply.push_str(phrase);
    if !phrase.ends_with(['?', '.', '!']) {
      reply.push('.');
    }
  }
  if !phase.key_vocabulary.is_empty() {
    let words: Vec<&str> = phase.key_vocabulary.iter().take(3).map(String::as_str).collect();
    reply.push_str(&format!(" Try using: {}.", words.join(", ")));
  }
  reply
}

fn record_call(state: &AppState, user: &User, model: &str, usage: Option<Usage>, status: &str) {
  let usage = usage.unwrap_or_default();
  let amount = UsageAmount { input_tokens: usage.input(), output_tokens: usage.output(), ..Default::default() };
  let cost = if status == "success" { estimate_cost("openai", model, "llm", amount).estimated_cost } else { 0.0 };
  let row = NewUsage {
    user_id: Some(user.id),
    api_provider: "openai",
    api_endpoint: "chat/completions",
    request_type: "llm",
    tokens_used: usage.total() as i64,
    estimated_cost: cost,
    status,
  };
  if let Err(e) = state.db.record_usage(&row, Utc::now()) {
    error!(target: "budget", user_id = %user.user_id, error = %e, "Failed to record API usage");
  }
}

/// Cache namespace for role-play replies: one per language, scenario and phase.
fn cache_scope(language: &str, ctx: &SessionContext) -> String {
  let phase = ctx.scenario.phases.get(ctx.phase_index).map_or("", |p| p.phase_id.as_str());
  format!("{}:{}:{}", language, ctx.scenario.scenario_id, phase)
}

/// Produce the in-character reply for a learner message.
/// Order: response cache, then OpenAI (budget permitting), then the local reply.
#[instrument(level = "info", skip(state, user, ctx, message), fields(user_id = %user.user_id, scenario = %ctx.scenario.scenario_id, msg_len = message.len()))]
pub async fn scenario_reply(
  state: &AppState,
  user: &User,
  ctx: &SessionContext,
  message: &str,
) -> ApiResult<(String, ReplySource)> {
  let scope = cache_scope(&state.config.scenarios.language, ctx);
  if let Some(hit) = state.cache.lock().await.get(&[message], &scope) {
    debug!(target: "cache", provider = %hit.provider, kind = hit.cache_type.as_str(), hits = hit.hit_count, "Serving cached reply");
    return Ok((hit.content, ReplySource::Cache));
  }

  let Some(oa) = &state.openai else {
    return Ok((local_reply(ctx, message), ReplySource::Local));
  };

  let system = roleplay_prompt(&state.config.prompts.roleplay_system, ctx);
  let (settings, status) = budget_snapshot(state, user)?;
  let estimate = estimate_cost(
    "openai",
    &oa.model,
    "llm",
    UsageAmount {
      input_tokens: ((system.len() + message.len()) / 4) as u64,
      output_tokens: EXPECTED_REPLY_TOKENS,
      ..Default::default()
    },
  );
  if !provider_allowed(&settings, &status, &estimate) {
    warn!(target: "budget", user_id = %user.user_id, alert = ?status.alert_level, estimated = estimate.estimated_cost, "Budget gate blocked provider call; using local reply");
    return Ok((local_reply(ctx, message), ReplySource::Local));
  }

  match oa.chat_reply(&system, message).await {
    Ok((text, usage)) => {
      record_call(state, user, &oa.model, usage, "success");
      let cached = state.cache.lock().await.set(&[message], &scope, &text, "openai", None);
      info!(target: "scenario", reply = %trunc_for_log(&text, 80), cached, "OpenAI reply");
      Ok((text, ReplySource::Openai))
    }
    Err(e) => {
      error!(target: "scenario", error = %e, "OpenAI reply failed; using local reply");
      record_call(state, user, &oa.model, None, "error");
      Ok((local_reply(ctx, message), ReplySource::Local))
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::BudgetConfig;
  use crate::db::users::NewUser;
  use crate::domain::UserRole;
  use crate::openai::OpenAI;
  use crate::seeds::predefined_scenarios;
  use axum::http::StatusCode;
  use serde_json::json;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Arc;

  fn settings() -> BudgetSettings {
    BudgetSettings::new_default("u1", &BudgetConfig::default(), Utc::now())
  }

  fn ctx() -> SessionContext {
    let scenario = predefined_scenarios().into_iter().next().unwrap();
    SessionContext { user_id: "u1".into(), scenario, phase_index: 0 }
  }

  fn user(state: &AppState, user_id: &str, role: UserRole) -> User {
    state
      .db
      .create_user(&NewUser {
        user_id: user_id.into(),
        username: user_id.into(),
        email: None,
        password_hash: None,
        role,
        first_name: None,
        last_name: None,
      })
      .unwrap()
  }

  fn estimate(cost: f64) -> CostEstimate {
    CostEstimate {
      estimated_cost: cost,
      provider: "openai".into(),
      service_type: "llm".into(),
      tokens_estimated: 0,
      confidence: 0.9,
    }
  }

  #[test]
  fn settings_update_validates_before_applying() {
    let mut s = settings();
    let bad = BudgetSettingsUpdate {
      monthly_limit_usd: Some(50.0),
      alert_threshold_yellow: Some(80.0),
      ..Default::default()
    };
    assert!(matches!(apply_settings_update(&mut s, &bad, Utc::now()), Err(ApiError::BadRequest(_))));
    assert_eq!(s.monthly_limit_usd, 30.0);

    let out_of_range = BudgetSettingsUpdate { monthly_limit_usd: Some(20_000.0), ..Default::default() };
    assert!(apply_settings_update(&mut s, &out_of_range, Utc::now()).is_err());
    let bad_period = BudgetSettingsUpdate { budget_period: Some("yearly".into()), ..Default::default() };
    assert!(apply_settings_update(&mut s, &bad_period, Utc::now()).is_err());

    let now = Utc::now();
    let good = BudgetSettingsUpdate {
      budget_period: Some("custom".into()),
      custom_period_days: Some(10),
      alert_threshold_red: Some(95.0),
      ..Default::default()
    };
    apply_settings_update(&mut s, &good, now).unwrap();
    assert_eq!(s.budget_period, BudgetPeriod::Custom);
    assert_eq!(s.current_period_end, Some(now + chrono::Duration::days(10)));
    assert_eq!(s.alert_threshold_red, 95.0);
  }

  #[test]
  fn admin_notes_are_bounded() {
    let mut s = settings();
    let input = AdminConfigureIn {
      target_user_id: "u1".into(),
      budget_visible_to_user: Some(false),
      user_can_modify_limit: None,
      user_can_reset_budget: Some(true),
      monthly_limit_usd: Some(5.0),
      admin_notes: Some("x".repeat(501)),
    };
    assert!(apply_admin_configure(&mut s, &input, "root", Utc::now()).is_err());
    assert!(s.budget_visible_to_user);

    let input = AdminConfigureIn { admin_notes: Some("trial account".into()), ..input };
    apply_admin_configure(&mut s, &input, "root", Utc::now()).unwrap();
    assert!(!s.budget_visible_to_user);
    assert!(s.user_can_reset_budget);
    assert_eq!(s.monthly_limit_usd, 5.0);
    assert_eq!(s.configured_by.as_deref(), Some("root"));
  }

  #[test]
  fn budget_gate() {
    let mut s = settings();
    let fresh = compute_status(&s, 0.0, Utc::now());
    assert!(provider_allowed(&s, &fresh, &estimate(0.001)));

    // over budget: blocked only when override is off
    let over = compute_status(&s, 40.0, Utc::now());
    assert!(provider_allowed(&s, &over, &estimate(0.02)));
    s.allow_budget_override = false;
    assert!(!provider_allowed(&s, &over, &estimate(0.02)));
    s.enforce_budget = false;
    assert!(provider_allowed(&s, &over, &estimate(0.02)));

    // red level with auto fallback forces local replies
    s.auto_fallback_to_local = true;
    let red = compute_status(&s, 28.0, Utc::now());
    assert_eq!(red.alert_level, AlertLevel::Red);
    assert!(!provider_allowed(&s, &red, &estimate(0.001)));
  }

  #[test]
  fn local_reply_uses_phase_material() {
    let c = ctx();
    let reply = local_reply(&c, "Hello, table for two?");
    assert!(reply.starts_with("Good question."));
    assert!(reply.ends_with("Try using: reservation, table, party."));

    // four words -> phrase index 0, ellipsis-free
    let reply = local_reply(&c, "I want a table");
    assert!(reply.starts_with("I see. I'd like to make a reservation."));

    let mut empty = c.clone();
    empty.phase_index = 99;
    assert_eq!(local_reply(&empty, "hi"), "Let's continue our conversation.");
  }

  #[test]
  fn prompt_is_filled_from_scenario() {
    let prompt = roleplay_prompt("{ai_role} at {setting}; phase {phase}: {vocabulary}", &ctx());
    assert_eq!(
      prompt,
      "service provider at An upscale restaurant in the city center; phase Making the Reservation: reservation, table, party, time, available"
    );
  }

  #[tokio::test]
  async fn reply_without_provider_is_local_and_free() {
    let dir = tempfile::tempdir().unwrap();
    let state = AppState::for_tests(dir.path());
    let user = user(&state, "kid", UserRole::Child);
    let (text, source) = scenario_reply(&state, &user, &ctx(), "hello there").await.unwrap();
    assert_eq!(source, ReplySource::Local);
    assert!(text.starts_with("I see."));
    assert_eq!(state.db.sum_cost_since(user.id, Utc::now() - chrono::Duration::days(1)).unwrap(), 0.0);
  }

  #[tokio::test]
  async fn cached_reply_wins() {
    let dir = tempfile::tempdir().unwrap();
    let state = AppState::for_tests(dir.path());
    let user = user(&state, "kid", UserRole::Child);
    let reply = "Hello! Welcome, do you have a reservation with us tonight?";
    let scope = cache_scope("en", &ctx());
    assert_eq!(scope, "en:restaurant_dinner_reservation:reservation");
    assert!(state.cache.lock().await.set(&["hello"], &scope, reply, "openai", None));
    let (text, source) = scenario_reply(&state, &user, &ctx(), "Hello").await.unwrap();
    assert_eq!(source, ReplySource::Cache);
    assert_eq!(text, reply);
  }

  #[tokio::test]
  async fn cached_replies_stay_within_scenario_and_phase() {
    let dir = tempfile::tempdir().unwrap();
    let state = AppState::for_tests(dir.path());
    let bob = user(&state, "bob", UserRole::Child);
    let reply = "Good evening, your table for two at 8pm is ready.";
    assert!(state.cache.lock().await.set(&["hello"], &cache_scope("en", &ctx()), reply, "openai", None));

    let hotel = predefined_scenarios().into_iter().find(|s| s.scenario_id == "hotel_check_in").unwrap();
    let other_scenario = SessionContext { user_id: "bob".into(), scenario: hotel, phase_index: 0 };
    let (text, source) = scenario_reply(&state, &bob, &other_scenario, "Hello").await.unwrap();
    assert_eq!(source, ReplySource::Local);
    assert_ne!(text, reply);

    let mut later_phase = ctx();
    later_phase.phase_index = 1;
    let (_, source) = scenario_reply(&state, &bob, &later_phase, "Hello").await.unwrap();
    assert_eq!(source, ReplySource::Local);
  }

  /// Local chat-completions endpoint answering with `status`; counts requests.
  async fn mock_provider(status: StatusCode) -> (OpenAI, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let app = axum::Router::new().route(
      "/chat/completions",
      axum::routing::post(move || {
        let counter = counter.clone();
        async move {
          counter.fetch_add(1, Ordering::SeqCst);
          let body = if status.is_success() {
            json!({
              "choices": [{"message": {"content": "Good evening! Do you have a reservation with us tonight?"}}],
              "usage": {"prompt_tokens": 120, "completion_tokens": 30, "total_tokens": 150}
            })
          } else {
            json!({"error": {"message": "upstream overloaded"}})
          };
          (status, axum::Json(body))
        }
      }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

    let client = OpenAI {
      client: reqwest::Client::builder().no_proxy().build().unwrap(),
      api_key: "sk-test".into(),
      base_url: format!("http://{}", addr),
      model: "gpt-4o-mini".into(),
    };
    (client, hits)
  }

  fn usage_rows(state: &AppState, user: &User) -> Vec<crate::db::usage::ApiUsage> {
    state.db.list_usage_since(user.id, Utc::now() - chrono::Duration::days(1)).unwrap()
  }

  #[tokio::test]
  async fn provider_reply_is_recorded_and_cached() {
    let dir = tempfile::tempdir().unwrap();
    let mut state = AppState::for_tests(dir.path());
    let (client, hits) = mock_provider(StatusCode::OK).await;
    state.openai = Some(client);
    let kid = user(&state, "kid", UserRole::Child);

    let (text, source) = scenario_reply(&state, &kid, &ctx(), "Hello, a table for two please").await.unwrap();
    assert_eq!(source, ReplySource::Openai);
    assert_eq!(text, "Good evening! Do you have a reservation with us tonight?");

    let rows = usage_rows(&state, &kid);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, "success");
    assert_eq!(rows[0].tokens_used, 150);
    assert!(rows[0].estimated_cost > 0.0);

    // the second identical message is served from the cache without a new call
    let (again, source) = scenario_reply(&state, &kid, &ctx(), "Hello, a table for two please").await.unwrap();
    assert_eq!(source, ReplySource::Cache);
    assert_eq!(again, text);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(usage_rows(&state, &kid).len(), 1);
  }

  #[tokio::test]
  async fn provider_failure_is_logged_free_and_falls_back() {
    let dir = tempfile::tempdir().unwrap();
    let mut state = AppState::for_tests(dir.path());
    let (client, hits) = mock_provider(StatusCode::INTERNAL_SERVER_ERROR).await;
    state.openai = Some(client);
    let kid = user(&state, "kid", UserRole::Child);

    let (_, source) = scenario_reply(&state, &kid, &ctx(), "Hello, a table for two please").await.unwrap();
    assert_eq!(source, ReplySource::Local);
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    let rows = usage_rows(&state, &kid);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, "error");
    assert_eq!(rows[0].estimated_cost, 0.0);
    assert_eq!(state.cache.lock().await.stats().entries, 0);
  }

  #[tokio::test]
  async fn exhausted_budget_skips_the_provider() {
    let dir = tempfile::tempdir().unwrap();
    let mut state = AppState::for_tests(dir.path());
    let (client, hits) = mock_provider(StatusCode::OK).await;
    state.openai = Some(client);
    let kid = user(&state, "kid", UserRole::Child);

    let mut settings = state.db.get_or_create_budget_settings("kid", &state.config.budget).unwrap();
    settings.monthly_limit_usd = 1.0;
    settings.enforce_budget = true;
    settings.allow_budget_override = false;
    state.db.save_budget_settings(&settings).unwrap();
    let spent = NewUsage {
      user_id: Some(kid.id),
      api_provider: "openai",
      api_endpoint: "chat/completions",
      request_type: "llm",
      tokens_used: 1000,
      estimated_cost: 1.5,
      status: "success",
    };
    state.db.record_usage(&spent, Utc::now()).unwrap();

    let (_, source) = scenario_reply(&state, &kid, &ctx(), "Hello, a table for two please").await.unwrap();
    assert_eq!(source, ReplySource::Local);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert_eq!(usage_rows(&state, &kid).len(), 1);
  }

  #[tokio::test]
  async fn reset_logs_and_starts_new_period() {
    let dir = tempfile::tempdir().unwrap();
    let state = AppState::for_tests(dir.path());
    let user = user(&state, "p1", UserRole::Parent);
    let (settings, _) = budget_snapshot(&state, &user).unwrap();
    let usage = |cost: f64, provider: &'static str| NewUsage {
      user_id: Some(user.id),
      api_provider: provider,
      api_endpoint: "chat/completions",
      request_type: "llm",
      tokens_used: 10,
      estimated_cost: cost,
      status: "success",
    };
    state.db.record_usage(&usage(0.5, "openai"), Utc::now()).unwrap();
    state.db.record_usage(&usage(1.5, "anthropic"), Utc::now()).unwrap();

    let breakdown = usage_breakdown(&state, &user, &settings).unwrap();
    assert!((breakdown.total_spent - 2.0).abs() < 1e-9);
    assert_eq!(breakdown.by_provider.len(), 2);
    assert_eq!(breakdown.by_day.len(), 1);
    assert_eq!(breakdown.by_day[0].requests, 2);
    assert_eq!(breakdown.top_expensive_operations[0].provider, "anthropic");

    let out = reset_budget_period(&state, &user, Some("admin1"), None).unwrap();
    assert!((out.previous_spent - 2.0).abs() < 1e-9);
    assert_eq!(out.message, "Budget reset successfully for user p1");

    let logs = state.db.list_reset_logs("p1", 10).unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].reset_by, "admin1");
    assert_eq!(logs[0].reason.as_deref(), Some("Manual reset by admin admin1"));

    let (_, status) = budget_snapshot(&state, &user).unwrap();
    assert_eq!(status.used_budget, 0.0);
  }
}
