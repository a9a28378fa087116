//! Domain models used by the backend: users and roles, scenarios with their
//! phases, per-conversation progress, and universal scenario templates.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------- Users ----------

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
  Child,
  Parent,
  Admin,
}

impl UserRole {
  pub fn as_str(&self) -> &'static str {
    match self {
      UserRole::Child => "child",
      UserRole::Parent => "parent",
      UserRole::Admin => "admin",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s.trim().to_ascii_lowercase().as_str() {
      "child" => Some(UserRole::Child),
      "parent" => Some(UserRole::Parent),
      "admin" => Some(UserRole::Admin),
      _ => None,
    }
  }
}

#[derive(Clone, Debug, Serialize)]
pub struct User {
  pub id: i64,
  pub user_id: String,
  pub username: String,
  pub email: Option<String>,
  #[serde(skip_serializing)]
  pub password_hash: Option<String>,
  pub role: UserRole,
  pub first_name: Option<String>,
  pub last_name: Option<String>,
  pub ui_language: String,
  pub is_active: bool,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
  pub last_login: Option<DateTime<Utc>>,
}

// ---------- Scenarios ----------

macro_rules! str_enum {
  ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
    impl $name {
      #[allow(dead_code)]
      pub const ALL: &'static [$name] = &[$($name::$variant),+];

      pub fn as_str(&self) -> &'static str {
        match self { $($name::$variant => $s),+ }
      }

      pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
          $($s => Some($name::$variant),)+
          _ => None,
        }
      }
    }
  };
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioCategory {
  Travel,
  Restaurant,
  Shopping,
  Business,
  Healthcare,
  Social,
  Emergency,
  Education,
  DailyLife,
  Hobbies,
}

str_enum!(ScenarioCategory {
  Travel => "travel",
  Restaurant => "restaurant",
  Shopping => "shopping",
  Business => "business",
  Healthcare => "healthcare",
  Social => "social",
  Emergency => "emergency",
  Education => "education",
  DailyLife => "daily_life",
  Hobbies => "hobbies",
});

/// Declaration order is difficulty order: beginner < intermediate < advanced < native.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioDifficulty {
  Beginner,
  Intermediate,
  Advanced,
  Native,
}

str_enum!(ScenarioDifficulty {
  Beginner => "beginner",
  Intermediate => "intermediate",
  Advanced => "advanced",
  Native => "native",
});

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConversationRole {
  Customer,
  ServiceProvider,
  Friend,
  Colleague,
  Student,
  Teacher,
  Tourist,
  Local,
}

str_enum!(ConversationRole {
  Customer => "customer",
  ServiceProvider => "service_provider",
  Friend => "friend",
  Colleague => "colleague",
  Student => "student",
  Teacher => "teacher",
  Tourist => "tourist",
  Local => "local",
});

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScenarioPhase {
  pub phase_id: String,
  pub name: String,
  pub description: String,
  pub expected_duration_minutes: u32,
  #[serde(default)] pub key_vocabulary: Vec<String>,
  #[serde(default)] pub essential_phrases: Vec<String>,
  #[serde(default)] pub learning_objectives: Vec<String>,
  #[serde(default)] pub cultural_notes: Option<String>,
  #[serde(default)] pub success_criteria: Vec<String>,
}

fn default_true() -> bool { true }

/// Files written by older tooling store `"cultural_context": null`.
fn null_as_empty<'de, D>(d: D) -> Result<serde_json::Map<String, serde_json::Value>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  Ok(Option::<serde_json::Map<String, serde_json::Value>>::deserialize(d)?.unwrap_or_default())
}

/// Complete scenario definition. Persisted as-is in the scenarios JSON file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversationScenario {
  pub scenario_id: String,
  pub name: String,
  pub category: ScenarioCategory,
  pub difficulty: ScenarioDifficulty,
  pub description: String,
  pub user_role: ConversationRole,
  pub ai_role: ConversationRole,
  pub setting: String,
  pub duration_minutes: u32,
  pub phases: Vec<ScenarioPhase>,
  #[serde(default)] pub vocabulary_focus: Vec<String>,
  #[serde(default, deserialize_with = "null_as_empty")]
  pub cultural_context: serde_json::Map<String, serde_json::Value>,
  #[serde(default)] pub learning_goals: Vec<String>,
  #[serde(default)] pub learning_outcomes: Vec<String>,
  #[serde(default)] pub prerequisites: Vec<String>,
  #[serde(default = "default_true")] pub is_active: bool,
  #[serde(default = "Utc::now")] pub created_at: DateTime<Utc>,
  #[serde(default = "Utc::now")] pub updated_at: DateTime<Utc>,
}

/// Progress of one user through one scenario conversation. In-memory only.
#[derive(Clone, Debug, Serialize)]
pub struct ScenarioProgress {
  pub progress_id: String,
  pub scenario_id: String,
  pub user_id: String,
  /// Always within `[0, scenario.phases.len())`.
  pub current_phase: usize,
  /// phase_id -> completion percentage (0..=100)
  pub phase_progress: HashMap<String, f64>,
  pub vocabulary_mastered: Vec<String>,
  pub objectives_completed: Vec<String>,
  pub start_time: DateTime<Utc>,
  pub last_activity: DateTime<Utc>,
  pub total_attempts: u32,
  pub success_rate: f64,
  /// Number of scored messages folded into `success_rate`.
  #[serde(skip)]
  pub scored_messages: u32,
}

// ---------- Universal templates ----------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScenarioVariation {
  pub id: String,
  #[serde(default)] pub description: String,
  #[serde(default)] pub setting: String,
  #[serde(default)] pub phases: Vec<String>,
}

/// Fields left out of a template take the values from `Default`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DifficultyModifier {
  pub duration: u32,
  pub phase_duration: u32,
  pub vocab_limit: usize,
  pub prerequisites: Vec<String>,
}

impl Default for DifficultyModifier {
  fn default() -> Self {
    Self { duration: 15, phase_duration: 4, vocab_limit: 20, prerequisites: Vec::new() }
  }
}

/// Data-only record used to stamp out concrete scenarios on demand.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UniversalScenarioTemplate {
  pub template_id: String,
  pub name: String,
  pub category: ScenarioCategory,
  /// 1 = essential ... 4 = cultural
  pub tier: u8,
  #[serde(default)] pub base_vocabulary: Vec<String>,
  /// difficulty -> phrases
  #[serde(default)] pub essential_phrases: BTreeMap<String, Vec<String>>,
  #[serde(default)] pub cultural_context: serde_json::Map<String, serde_json::Value>,
  #[serde(default)] pub learning_objectives: Vec<String>,
  #[serde(default)] pub conversation_starters: Vec<String>,
  #[serde(default)] pub scenario_variations: Vec<ScenarioVariation>,
  #[serde(default)] pub difficulty_modifiers: BTreeMap<String, DifficultyModifier>,
  #[serde(default)] pub success_metrics: Vec<String>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn difficulty_orders_by_level() {
    assert!(ScenarioDifficulty::Beginner < ScenarioDifficulty::Intermediate);
    assert!(ScenarioDifficulty::Advanced < ScenarioDifficulty::Native);
  }

  #[test]
  fn enums_parse_their_wire_names() {
    assert_eq!(ScenarioCategory::parse("daily_life"), Some(ScenarioCategory::DailyLife));
    assert_eq!(ConversationRole::parse("Service_Provider"), Some(ConversationRole::ServiceProvider));
    assert_eq!(ScenarioDifficulty::parse("expert"), None);
    assert_eq!(UserRole::parse("ADMIN"), Some(UserRole::Admin));
  }

  #[test]
  fn scenario_json_fills_optional_fields() {
    let raw = serde_json::json!({
      "scenario_id": "s1",
      "name": "Test",
      "category": "restaurant",
      "difficulty": "beginner",
      "description": "d",
      "user_role": "customer",
      "ai_role": "service_provider",
      "setting": "a cafe",
      "duration_minutes": 5,
      "phases": [{
        "phase_id": "p1",
        "name": "P1",
        "description": "first",
        "expected_duration_minutes": 2
      }]
    });
    let s: ConversationScenario = serde_json::from_value(raw).expect("valid scenario");
    assert!(s.is_active);
    assert!(s.phases[0].success_criteria.is_empty());
    assert!(s.cultural_context.is_empty());
  }

  #[test]
  fn null_cultural_context_reads_as_empty() {
    let raw = serde_json::json!({
      "scenario_id": "s2", "name": "N", "category": "travel", "difficulty": "native",
      "description": "", "user_role": "tourist", "ai_role": "local", "setting": "",
      "duration_minutes": 1, "phases": [], "cultural_context": null
    });
    let s: ConversationScenario = serde_json::from_value(raw).expect("null context accepted");
    assert!(s.cultural_context.is_empty());
  }
}
