//! Budget arithmetic: period bounds, alert buckets, projections, cost estimates
//! and affordability. Everything here is pure; the database layer supplies the
//! settings row and the summed spend, the HTTP layer supplies the caller.

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::config::BudgetConfig;
use crate::domain::UserRole;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BudgetPeriod {
  Monthly,
  Weekly,
  Daily,
  Custom,
}

impl BudgetPeriod {
  pub fn as_str(&self) -> &'static str {
    match self {
      BudgetPeriod::Monthly => "monthly",
      BudgetPeriod::Weekly => "weekly",
      BudgetPeriod::Daily => "daily",
      BudgetPeriod::Custom => "custom",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "monthly" => Some(BudgetPeriod::Monthly),
      "weekly" => Some(BudgetPeriod::Weekly),
      "daily" => Some(BudgetPeriod::Daily),
      "custom" => Some(BudgetPeriod::Custom),
      _ => None,
    }
  }
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
  Green,
  Yellow,
  Orange,
  Red,
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CostStrategy {
  CheapestFirst,
  Balanced,
  QualityFirst,
  EmergencyOnly,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BudgetPermission {
  View,
  Modify,
  Reset,
}

/// Per-user budget configuration (one row per user, created lazily).
#[derive(Clone, Debug, Serialize)]
pub struct BudgetSettings {
  pub user_id: String,
  pub monthly_limit_usd: f64,
  pub custom_limit_usd: Option<f64>,
  pub budget_period: BudgetPeriod,
  pub custom_period_days: Option<i64>,
  pub current_period_start: DateTime<Utc>,
  pub current_period_end: Option<DateTime<Utc>>,
  pub last_reset_date: DateTime<Utc>,
  pub enforce_budget: bool,
  pub allow_budget_override: bool,
  pub auto_fallback_to_local: bool,
  pub alert_threshold_yellow: f64,
  pub alert_threshold_orange: f64,
  pub alert_threshold_red: f64,
  pub budget_visible_to_user: bool,
  pub user_can_modify_limit: bool,
  pub user_can_reset_budget: bool,
  pub admin_notes: Option<String>,
  pub configured_by: Option<String>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl BudgetSettings {
  /// Defaults for a user seen for the first time.
  pub fn new_default(user_id: &str, cfg: &BudgetConfig, now: DateTime<Utc>) -> Self {
    Self {
      user_id: user_id.to_string(),
      monthly_limit_usd: cfg.default_monthly_limit_usd,
      custom_limit_usd: None,
      budget_period: BudgetPeriod::Monthly,
      custom_period_days: None,
      current_period_start: now,
      current_period_end: Some(calculate_period_end(BudgetPeriod::Monthly, None, now)),
      last_reset_date: now,
      enforce_budget: true,
      allow_budget_override: true,
      auto_fallback_to_local: false,
      alert_threshold_yellow: cfg.default_alert_yellow,
      alert_threshold_orange: cfg.default_alert_orange,
      alert_threshold_red: cfg.default_alert_red,
      budget_visible_to_user: true,
      user_can_modify_limit: false,
      user_can_reset_budget: false,
      admin_notes: None,
      configured_by: None,
      created_at: now,
      updated_at: now,
    }
  }

  /// Custom limit wins when set.
  pub fn effective_limit(&self) -> f64 {
    self.custom_limit_usd.unwrap_or(self.monthly_limit_usd)
  }

  pub fn thresholds_ascending(&self) -> bool {
    self.alert_threshold_yellow < self.alert_threshold_orange
      && self.alert_threshold_orange < self.alert_threshold_red
  }
}

#[derive(Clone, Debug, Serialize)]
pub struct BudgetStatus {
  pub total_budget: f64,
  pub used_budget: f64,
  pub remaining_budget: f64,
  pub percentage_used: f64,
  pub alert_level: AlertLevel,
  pub days_remaining_in_period: i64,
  pub projected_period_cost: f64,
  pub is_over_budget: bool,
  pub period_start: DateTime<Utc>,
  pub period_end: Option<DateTime<Utc>>,
  pub budget_period: BudgetPeriod,
}

/// End of a period that starts at `now`.
pub fn calculate_period_end(period: BudgetPeriod, custom_days: Option<i64>, now: DateTime<Utc>) -> DateTime<Utc> {
  match (period, custom_days) {
    (BudgetPeriod::Weekly, _) => now + Duration::days(7),
    (BudgetPeriod::Daily, _) => now
      .date_naive()
      .succ_opt()
      .and_then(|d| d.and_hms_opt(0, 0, 0))
      .map(|d| d.and_utc())
      .unwrap_or_else(|| now + Duration::days(1)),
    (BudgetPeriod::Custom, Some(days)) if days > 0 => now + Duration::days(days),
    _ => first_of_next_month(now),
  }
}

fn first_of_next_month(now: DateTime<Utc>) -> DateTime<Utc> {
  let (year, month) = if now.month() == 12 { (now.year() + 1, 1) } else { (now.year(), now.month() + 1) };
  Utc
    .with_ymd_and_hms(year, month, 1, 0, 0, 0)
    .single()
    .unwrap_or_else(|| now + Duration::days(30))
}

/// Highest threshold the percentage meets: red > orange > yellow, else green.
pub fn alert_level(percentage: f64, settings: &BudgetSettings) -> AlertLevel {
  if percentage >= settings.alert_threshold_red {
    AlertLevel::Red
  } else if percentage >= settings.alert_threshold_orange {
    AlertLevel::Orange
  } else if percentage >= settings.alert_threshold_yellow {
    AlertLevel::Yellow
  } else {
    AlertLevel::Green
  }
}

/// Linear extrapolation of the spend over the whole period.
pub fn projected_period_cost(spent: f64, days_elapsed: i64, period: BudgetPeriod, custom_days: Option<i64>) -> f64 {
  if days_elapsed <= 0 {
    return 0.0;
  }
  let daily_average = spent / days_elapsed as f64;
  match (period, custom_days) {
    (BudgetPeriod::Daily, _) => spent,
    (BudgetPeriod::Weekly, _) => daily_average * 7.0,
    (BudgetPeriod::Custom, Some(days)) if days > 0 => daily_average * days as f64,
    _ => daily_average * 30.0,
  }
}

pub fn compute_status(settings: &BudgetSettings, spent: f64, now: DateTime<Utc>) -> BudgetStatus {
  let limit = settings.effective_limit();
  let percentage_used = if limit > 0.0 { spent / limit * 100.0 } else { 0.0 };
  let days_remaining_in_period = settings
    .current_period_end
    .map(|end| (end - now).num_days().max(0))
    .unwrap_or(0);
  let days_elapsed = (now - settings.current_period_start).num_days() + 1;

  BudgetStatus {
    total_budget: limit,
    used_budget: spent,
    remaining_budget: (limit - spent).max(0.0),
    percentage_used,
    alert_level: alert_level(percentage_used, settings),
    days_remaining_in_period,
    projected_period_cost: projected_period_cost(spent, days_elapsed, settings.budget_period, settings.custom_period_days),
    is_over_budget: spent > limit,
    period_start: settings.current_period_start,
    period_end: settings.current_period_end,
    budget_period: settings.budget_period,
  }
}

/// Admins always pass; everyone else needs the matching flag.
pub fn has_permission(role: UserRole, settings: &BudgetSettings, permission: BudgetPermission) -> bool {
  if role == UserRole::Admin {
    return true;
  }
  match permission {
    BudgetPermission::View => settings.budget_visible_to_user,
    BudgetPermission::Modify => settings.user_can_modify_limit,
    BudgetPermission::Reset => settings.user_can_reset_budget,
  }
}

// ---------- Cost estimation ----------

#[derive(Clone, Copy, Debug)]
enum Pricing {
  /// USD per 1K tokens
  Tokens { input: f64, output: f64 },
  PerMinute(f64),
  PerCharacter(f64),
}

const PRICE_TABLE: &[(&str, &str, Pricing)] = &[
  ("anthropic", "claude-3-haiku", Pricing::Tokens { input: 0.00025, output: 0.00125 }),
  ("anthropic", "claude-3-sonnet", Pricing::Tokens { input: 0.003, output: 0.015 }),
  ("anthropic", "claude-3-opus", Pricing::Tokens { input: 0.015, output: 0.075 }),
  ("openai", "gpt-4o-mini", Pricing::Tokens { input: 0.00015, output: 0.0006 }),
  ("openai", "gpt-4o", Pricing::Tokens { input: 0.0025, output: 0.01 }),
  ("mistral", "mistral-tiny", Pricing::Tokens { input: 0.00014, output: 0.00042 }),
  ("mistral", "mistral-small", Pricing::Tokens { input: 0.0006, output: 0.0018 }),
  ("mistral", "mistral-medium", Pricing::Tokens { input: 0.0027, output: 0.0081 }),
  ("qwen", "qwen-turbo", Pricing::Tokens { input: 0.0001, output: 0.0002 }),
  ("qwen", "qwen-plus", Pricing::Tokens { input: 0.0004, output: 0.0008 }),
  ("qwen", "qwen-max", Pricing::Tokens { input: 0.002, output: 0.006 }),
  ("ibm_watson", "stt", Pricing::PerMinute(0.02)),
  ("ibm_watson", "tts", Pricing::PerCharacter(0.02 / 1000.0)),
];

#[derive(Clone, Copy, Debug, Default)]
pub struct UsageAmount {
  pub input_tokens: u64,
  pub output_tokens: u64,
  pub audio_minutes: f64,
  pub characters: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct CostEstimate {
  pub estimated_cost: f64,
  pub provider: String,
  pub service_type: String,
  pub tokens_estimated: u64,
  pub confidence: f64,
}

pub fn estimate_cost(provider: &str, model: &str, service_type: &str, usage: UsageAmount) -> CostEstimate {
  let pricing = PRICE_TABLE
    .iter()
    .find(|(p, m, _)| *p == provider && *m == model)
    .map(|(_, _, pricing)| *pricing);

  let (mut cost, mut confidence) = match (pricing, service_type) {
    (Some(Pricing::Tokens { input, output }), "llm") => (
      usage.input_tokens as f64 / 1000.0 * input + usage.output_tokens as f64 / 1000.0 * output,
      0.9,
    ),
    (Some(Pricing::PerMinute(rate)), "stt") => (usage.audio_minutes * rate, 0.85),
    (Some(Pricing::PerCharacter(rate)), "tts") => (usage.characters as f64 * rate, 0.85),
    _ => (0.0, 0.8),
  };

  if cost == 0.0 {
    cost = fallback_cost(service_type, usage);
    confidence = 0.5;
  }

  CostEstimate {
    estimated_cost: cost,
    provider: provider.to_string(),
    service_type: service_type.to_string(),
    tokens_estimated: usage.input_tokens + usage.output_tokens,
    confidence,
  }
}

fn fallback_cost(service_type: &str, usage: UsageAmount) -> f64 {
  match service_type {
    "llm" => (usage.input_tokens + usage.output_tokens) as f64 / 1000.0 * 0.002,
    "stt" => usage.audio_minutes * 0.025,
    "tts" => usage.characters as f64 / 1000.0 * 0.025,
    _ => 0.01,
  }
}

/// Remaining budget must cover the cost plus a buffer; near or over the limit
/// only small calls go through.
pub fn can_afford(status: &BudgetStatus, estimated_cost: f64, buffer: f64) -> bool {
  let mut affordable = status.remaining_budget >= estimated_cost * (1.0 + buffer);
  if status.is_over_budget {
    affordable = affordable && estimated_cost < 0.01;
  } else if status.alert_level == AlertLevel::Red {
    affordable = affordable && estimated_cost < 0.05;
  }
  affordable
}

pub fn recommended_strategy(status: &BudgetStatus) -> CostStrategy {
  if status.is_over_budget {
    CostStrategy::EmergencyOnly
  } else {
    match status.alert_level {
      AlertLevel::Red => CostStrategy::CheapestFirst,
      AlertLevel::Orange => CostStrategy::Balanced,
      _ => CostStrategy::QualityFirst,
    }
  }
}

#[derive(Clone, Debug, Serialize)]
pub struct BudgetNotice {
  pub level: &'static str,
  pub title: &'static str,
  pub message: String,
  pub action_required: bool,
}

pub fn alerts(status: &BudgetStatus) -> Vec<BudgetNotice> {
  if status.is_over_budget {
    return vec![BudgetNotice {
      level: "critical",
      title: "Budget Exceeded",
      message: format!(
        "You've exceeded your budget by ${:.2}",
        status.used_budget - status.total_budget
      ),
      action_required: true,
    }];
  }
  match status.alert_level {
    AlertLevel::Red => vec![BudgetNotice {
      level: "warning",
      title: "Budget Almost Exhausted",
      message: format!("You've used {:.1}% of your budget", status.percentage_used),
      action_required: true,
    }],
    AlertLevel::Orange => vec![BudgetNotice {
      level: "info",
      title: "Budget Watch",
      message: format!("You've used {:.1}% of your budget", status.percentage_used),
      action_required: false,
    }],
    _ => Vec::new(),
  }
}
