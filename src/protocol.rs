//! Public request/response structs for the HTTP API (serde ready).
//! Keep this small and stable to evolve backend and frontend independently.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::budget::{AlertLevel, BudgetNotice, BudgetStatus, CostStrategy};
use crate::domain::{User, UserRole};
use crate::scenarios::MessageOutcome;

#[derive(Debug, Serialize)]
pub struct HealthOut {
    pub ok: bool,
    pub openai: bool,
}

/// Generic `{message}` body.
#[derive(Debug, Serialize)]
pub struct MessageOut {
    pub message: String,
}

impl MessageOut {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// `{success, data, message}` wrapper used by the user-facing scenario API.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self { success: true, data, message: None }
    }

    pub fn with_message(data: T, message: impl Into<String>) -> Self {
        Self { success: true, data, message: Some(message.into()) }
    }
}

// ---------- Auth ----------

#[derive(Debug, Deserialize)]
pub struct RegisterIn {
    pub user_id: String,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginIn {
    pub user_id: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct UserProfile {
    pub id: i64,
    pub user_id: String,
    pub username: String,
    pub email: Option<String>,
    pub role: UserRole,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub ui_language: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl From<&User> for UserProfile {
    fn from(u: &User) -> Self {
        Self {
            id: u.id,
            user_id: u.user_id.clone(),
            username: u.username.clone(),
            email: u.email.clone(),
            role: u.role,
            first_name: u.first_name.clone(),
            last_name: u.last_name.clone(),
            ui_language: u.ui_language.clone(),
            is_active: u.is_active,
            created_at: u.created_at,
            last_login: u.last_login,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TokenOut {
    pub access_token: String,
    pub token_type: &'static str,
    pub user: UserProfile,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProfileUpdateIn {
    pub username: Option<String>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub ui_language: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MeUser {
    pub user_id: String,
    pub username: String,
    pub role: UserRole,
}

#[derive(Debug, Serialize)]
pub struct MeOut {
    pub authenticated: bool,
    pub user: Option<MeUser>,
}

// ---------- Budget ----------

#[derive(Debug, Serialize)]
pub struct BudgetStatusOut {
    pub user_id: String,
    #[serde(flatten)]
    pub status: BudgetStatus,
    pub can_view_budget: bool,
    pub can_modify_limit: bool,
    pub can_reset_budget: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct BudgetSettingsUpdate {
    pub monthly_limit_usd: Option<f64>,
    pub custom_limit_usd: Option<f64>,
    pub budget_period: Option<String>,
    pub custom_period_days: Option<i64>,
    pub enforce_budget: Option<bool>,
    pub allow_budget_override: Option<bool>,
    pub auto_fallback_to_local: Option<bool>,
    pub alert_threshold_yellow: Option<f64>,
    pub alert_threshold_orange: Option<f64>,
    pub alert_threshold_red: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResetIn {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ResetOut {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_by: Option<String>,
    pub new_period_start: DateTime<Utc>,
    pub new_period_end: Option<DateTime<Utc>>,
    pub previous_spent: f64,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct DayUsage {
    pub date: String,
    pub cost: f64,
    pub requests: u64,
}

#[derive(Debug, Serialize)]
pub struct TopOperation {
    pub timestamp: DateTime<Utc>,
    pub provider: String,
    pub service_type: String,
    pub cost: f64,
    pub tokens_used: i64,
}

#[derive(Debug, Serialize)]
pub struct UsageBreakdown {
    pub user_id: String,
    pub period_start: DateTime<Utc>,
    pub period_end: Option<DateTime<Utc>>,
    pub total_spent: f64,
    pub by_provider: BTreeMap<String, f64>,
    pub by_service_type: BTreeMap<String, f64>,
    pub by_day: Vec<DayUsage>,
    pub top_expensive_operations: Vec<TopOperation>,
}

#[derive(Debug, Serialize)]
pub struct AlertsOut {
    pub alert_level: AlertLevel,
    pub percentage_used: f64,
    pub alerts: Vec<BudgetNotice>,
    pub recommended_strategy: CostStrategy,
}

#[derive(Debug, Deserialize)]
pub struct AdminConfigureIn {
    pub target_user_id: String,
    pub budget_visible_to_user: Option<bool>,
    pub user_can_modify_limit: Option<bool>,
    pub user_can_reset_budget: Option<bool>,
    pub monthly_limit_usd: Option<f64>,
    pub admin_notes: Option<String>,
}

// ---------- Scenarios ----------

#[derive(Debug, Deserialize)]
pub struct ScenarioListQuery {
    pub category: Option<String>,
    pub difficulty: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TierQuery {
    pub tier: Option<u8>,
}

#[derive(Debug, Deserialize)]
pub struct CreateFromTemplateIn {
    pub template_id: String,
    pub difficulty: String,
    #[serde(default = "default_user_role")]
    pub user_role: String,
    #[serde(default = "default_ai_role")]
    pub ai_role: String,
    #[serde(default)]
    pub variation_id: Option<String>,
}

fn default_user_role() -> String {
    "student".into()
}

fn default_ai_role() -> String {
    "teacher".into()
}

#[derive(Debug, Deserialize)]
pub struct StartScenarioIn {
    pub scenario_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ScenarioMessageIn {
    pub progress_id: String,
    pub message: String,
}

/// Where the role-play reply came from.
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReplySource {
    Cache,
    Openai,
    Local,
}

#[derive(Debug, Serialize)]
pub struct ScenarioMessageOut {
    pub ai_response: String,
    pub reply_source: ReplySource,
    #[serde(flatten)]
    pub progress: MessageOutcome,
}

#[derive(Debug, Deserialize)]
pub struct SetActiveIn {
    pub is_active: bool,
}

#[derive(Debug, Serialize)]
pub struct CacheClearOut {
    pub success: bool,
    pub cleared: usize,
}
