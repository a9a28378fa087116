//! Loading application configuration from TOML plus environment overrides.
//!
//! See `AppConfig` for the expected schema. Every section is optional; missing
//! keys fall back to the defaults below.

use std::path::PathBuf;

use rand::{distributions::Alphanumeric, Rng};
use serde::Deserialize;
use tracing::{error, info, warn};

#[derive(Clone, Debug, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
  pub server: ServerConfig,
  pub auth: AuthConfig,
  pub budget: BudgetConfig,
  pub cache: CacheConfig,
  pub scenarios: ScenarioConfig,
  pub prompts: Prompts,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
  pub port: u16,
  pub database_path: String,
  pub static_dir: String,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self { port: 3000, database_path: "data/tutor.db".into(), static_dir: "./static".into() }
  }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
  /// HS256 signing secret. Empty means "generate one per process".
  pub jwt_secret: String,
  pub access_token_minutes: i64,
  /// Users registered without a password may log in with an empty one.
  pub allow_passwordless: bool,
}

impl Default for AuthConfig {
  fn default() -> Self {
    Self { jwt_secret: String::new(), access_token_minutes: 30, allow_passwordless: false }
  }
}

/// Defaults stamped onto lazily created budget settings.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
  pub default_monthly_limit_usd: f64,
  pub default_alert_yellow: f64,
  pub default_alert_orange: f64,
  pub default_alert_red: f64,
}

impl Default for BudgetConfig {
  fn default() -> Self {
    Self {
      default_monthly_limit_usd: 30.0,
      default_alert_yellow: 50.0,
      default_alert_orange: 75.0,
      default_alert_red: 90.0,
    }
  }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub max_entries: usize,
  pub default_ttl_hours: u64,
  pub stale_after_hours: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self { max_entries: 1000, default_ttl_hours: 24, stale_after_hours: 24 }
  }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
  pub scenarios_file: PathBuf,
  pub templates_dir: Option<PathBuf>,
  /// Language tag used for cache keys of scenario replies.
  pub language: String,
}

impl Default for ScenarioConfig {
  fn default() -> Self {
    Self {
      scenarios_file: PathBuf::from("data/scenarios/scenarios.json"),
      templates_dir: None,
      language: "en".into(),
    }
  }
}

/// Prompts used by the OpenAI client for scenario role-play.
/// Override them in TOML to tune tone/structure.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  pub roleplay_system: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      roleplay_system: "You are playing the role of a {ai_role} in a language practice scenario: {scenario}. \
Setting: {setting}. The learner is a {user_role}. Current phase: {phase} ({phase_description}). \
Stay in character, keep replies to 1-3 short sentences, and naturally use some of these words: {vocabulary}. \
Never switch to explaining grammar unless asked."
        .into(),
    }
  }
}

impl AppConfig {
  /// Load TOML from APP_CONFIG_PATH (if set), then apply env overrides.
  pub fn load() -> Self {
    let mut cfg = load_app_config_from_env().unwrap_or_default();
    cfg.apply_env_overrides();
    cfg.ensure_jwt_secret();
    cfg
  }

  fn apply_env_overrides(&mut self) {
    if let Some(port) = std::env::var("PORT").ok().and_then(|p| p.parse::<u16>().ok()) {
      self.server.port = port;
    }
    if let Ok(path) = std::env::var("DATABASE_PATH") {
      self.server.database_path = path;
    }
    if let Ok(path) = std::env::var("SCENARIOS_FILE") {
      self.scenarios.scenarios_file = PathBuf::from(path);
    }
    if let Ok(dir) = std::env::var("TEMPLATES_DIR") {
      self.scenarios.templates_dir = Some(PathBuf::from(dir));
    }
    if let Ok(secret) = std::env::var("JWT_SECRET") {
      self.auth.jwt_secret = secret;
    }
    if let Some(minutes) = std::env::var("ACCESS_TOKEN_MINUTES").ok().and_then(|m| m.parse::<i64>().ok()) {
      self.auth.access_token_minutes = minutes;
    }
  }

  fn ensure_jwt_secret(&mut self) {
    if self.auth.jwt_secret.is_empty() {
      warn!(target: "auth", "JWT_SECRET not set; generated a per-process secret (tokens will not survive restarts)");
      self.auth.jwt_secret = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(48)
        .map(char::from)
        .collect();
    }
  }
}

/// Attempt to load `AppConfig` from APP_CONFIG_PATH. On any parsing/IO error, returns None.
pub fn load_app_config_from_env() -> Option<AppConfig> {
  let path = std::env::var("APP_CONFIG_PATH").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match toml::from_str::<AppConfig>(&s) {
      Ok(cfg) => {
        info!(target: "tutor_backend", %path, "Loaded app config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "tutor_backend", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "tutor_backend", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn partial_toml_keeps_defaults() {
    let cfg: AppConfig = toml::from_str(
      r#"
      [server]
      port = 8080

      [budget]
      default_monthly_limit_usd = 12.5
      "#,
    )
    .expect("valid toml");
    assert_eq!(cfg.server.port, 8080);
    assert_eq!(cfg.server.database_path, "data/tutor.db");
    assert_eq!(cfg.budget.default_monthly_limit_usd, 12.5);
    assert_eq!(cfg.budget.default_alert_red, 90.0);
    assert_eq!(cfg.auth.access_token_minutes, 30);
    assert_eq!(cfg.cache.max_entries, 1000);
  }

  #[test]
  fn generated_secret_is_not_empty() {
    let mut cfg = AppConfig::default();
    cfg.ensure_jwt_secret();
    assert_eq!(cfg.auth.jwt_secret.len(), 48);
  }
}
