//! Universal scenario templates and the factory that stamps concrete
//! scenarios out of them.

use std::collections::HashMap;
use std::path::Path;

use chrono::Utc;
use serde::Deserialize;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::domain::{
  ConversationRole, ConversationScenario, DifficultyModifier, ScenarioCategory, ScenarioDifficulty,
  ScenarioPhase, ScenarioVariation, UniversalScenarioTemplate,
};
use crate::util::{short_uuid, title_case};

const BUILTIN_TEMPLATES: &str = include_str!("../assets/scenario_templates.toml");
const DEFAULT_PHASES: [&str; 3] = ["introduction", "main_interaction", "conclusion"];

#[derive(Debug, Error, PartialEq)]
pub enum FactoryError {
  #[error("Template {0} not found")]
  UnknownTemplate(String),
  #[error("Variation {variation} not found in template {template}")]
  UnknownVariation { template: String, variation: String },
}

#[derive(Deserialize)]
struct TemplateFile {
  #[serde(default)]
  templates: Vec<UniversalScenarioTemplate>,
}

pub struct ScenarioFactory {
  templates: HashMap<String, UniversalScenarioTemplate>,
}

impl ScenarioFactory {
  /// Templates from `dir` when it yields any, otherwise the built-in set.
  #[instrument(level = "info")]
  pub fn load(dir: Option<&Path>) -> Self {
    let mut loaded = dir.map(load_dir).unwrap_or_default();
    if loaded.is_empty() {
      loaded = builtin_templates();
    }
    info!(target: "scenario", count = loaded.len(), "Universal templates loaded");
    Self::from_templates(loaded)
  }

  pub fn from_templates(list: Vec<UniversalScenarioTemplate>) -> Self {
    let templates = list.into_iter().map(|t| (t.template_id.clone(), t)).collect();
    Self { templates }
  }

  pub fn all(&self) -> Vec<&UniversalScenarioTemplate> {
    self.by_tier(None)
  }

  pub fn by_id(&self, template_id: &str) -> Option<&UniversalScenarioTemplate> {
    self.templates.get(template_id)
  }

  /// Sorted by tier, then name.
  pub fn by_tier(&self, tier: Option<u8>) -> Vec<&UniversalScenarioTemplate> {
    let mut out: Vec<_> = self
      .templates
      .values()
      .filter(|t| tier.map_or(true, |wanted| t.tier == wanted))
      .collect();
    out.sort_by(|a, b| a.tier.cmp(&b.tier).then_with(|| a.name.cmp(&b.name)));
    out
  }

  pub fn by_category(&self, category: ScenarioCategory) -> Vec<&UniversalScenarioTemplate> {
    self.by_tier(None).into_iter().filter(|t| t.category == category).collect()
  }

  #[instrument(level = "info", skip(self))]
  pub fn create_scenario(
    &self,
    template_id: &str,
    difficulty: ScenarioDifficulty,
    user_role: ConversationRole,
    ai_role: ConversationRole,
    variation_id: Option<&str>,
  ) -> Result<ConversationScenario, FactoryError> {
    let template = self
      .by_id(template_id)
      .ok_or_else(|| FactoryError::UnknownTemplate(template_id.to_string()))?;
    build_scenario(template, difficulty, user_role, ai_role, variation_id)
  }
}

fn builtin_templates() -> Vec<UniversalScenarioTemplate> {
  match toml::from_str::<TemplateFile>(BUILTIN_TEMPLATES) {
    Ok(file) => file.templates,
    Err(e) => {
      error!(target: "scenario", error = %e, "Built-in template asset failed to parse");
      Vec::new()
    }
  }
}

fn load_dir(dir: &Path) -> Vec<UniversalScenarioTemplate> {
  let entries = match std::fs::read_dir(dir) {
    Ok(e) => e,
    Err(e) => {
      warn!(target: "scenario", dir = %dir.display(), error = %e, "Template directory unreadable; using built-in templates");
      return Vec::new();
    }
  };
  let mut paths: Vec<_> = entries.filter_map(|e| e.ok().map(|e| e.path())).collect();
  paths.sort();

  let mut out = Vec::new();
  for path in paths {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
    if ext != "toml" && ext != "json" {
      continue;
    }
    let raw = match std::fs::read_to_string(&path) {
      Ok(s) => s,
      Err(e) => {
        error!(target: "scenario", path = %path.display(), error = %e, "Failed to read template file");
        continue;
      }
    };
    let parsed = if ext == "toml" {
      toml::from_str::<TemplateFile>(&raw).map(|f| f.templates).map_err(|e| e.to_string())
    } else {
      serde_json::from_str::<UniversalScenarioTemplate>(&raw).map(|t| vec![t]).map_err(|e| e.to_string())
    };
    match parsed {
      Ok(mut ts) => {
        info!(target: "scenario", path = %path.display(), count = ts.len(), "Loaded template file");
        out.append(&mut ts);
      }
      Err(e) => error!(target: "scenario", path = %path.display(), error = %e, "Skipping invalid template file"),
    }
  }
  out
}

fn modifier_for(template: &UniversalScenarioTemplate, difficulty: ScenarioDifficulty) -> DifficultyModifier {
  let key = match difficulty {
    ScenarioDifficulty::Native => ScenarioDifficulty::Advanced.as_str(),
    d => d.as_str(),
  };
  template.difficulty_modifiers.get(key).cloned().unwrap_or_default()
}

fn phrases_for(template: &UniversalScenarioTemplate, difficulty: ScenarioDifficulty) -> Vec<String> {
  let by_level = &template.essential_phrases;
  by_level
    .get(difficulty.as_str())
    .or_else(|| by_level.get(ScenarioDifficulty::Intermediate.as_str()))
    .or_else(|| by_level.values().next())
    .cloned()
    .unwrap_or_default()
}

/// Contiguous chunk `i` of `n` for `items`; empty when there are fewer items than phases.
fn chunk<T: Clone>(items: &[T], i: usize, n: usize) -> Vec<T> {
  if items.is_empty() || n == 0 {
    return Vec::new();
  }
  let size = items.len().div_ceil(n);
  items.chunks(size).nth(i).map(|c| c.to_vec()).unwrap_or_default()
}

fn build_scenario(
  template: &UniversalScenarioTemplate,
  difficulty: ScenarioDifficulty,
  user_role: ConversationRole,
  ai_role: ConversationRole,
  variation_id: Option<&str>,
) -> Result<ConversationScenario, FactoryError> {
  let variation: Option<&ScenarioVariation> = match variation_id {
    Some(id) => Some(
      template
        .scenario_variations
        .iter()
        .find(|v| v.id == id)
        .ok_or_else(|| FactoryError::UnknownVariation {
          template: template.template_id.clone(),
          variation: id.to_string(),
        })?,
    ),
    None => template.scenario_variations.first(),
  };

  let modifier = modifier_for(template, difficulty);
  let phrases = phrases_for(template, difficulty);
  let vocabulary: Vec<String> = template.base_vocabulary.iter().take(modifier.vocab_limit).cloned().collect();

  let phase_ids: Vec<String> = match variation {
    Some(v) if !v.phases.is_empty() => v.phases.clone(),
    _ => DEFAULT_PHASES.iter().map(|s| s.to_string()).collect(),
  };
  let n = phase_ids.len();
  let notes = template.cultural_context.get("notes").and_then(|v| v.as_str()).map(str::to_string);

  let phases: Vec<ScenarioPhase> = phase_ids
    .iter()
    .enumerate()
    .map(|(i, id)| {
      let name = title_case(id);
      let mut objectives = chunk(&template.learning_objectives, i, n);
      if objectives.is_empty() {
        objectives.push(match template.learning_objectives.get(i % template.learning_objectives.len().max(1)) {
          Some(o) => o.clone(),
          None => format!("Complete the {} phase", name.to_lowercase()),
        });
      }
      ScenarioPhase {
        phase_id: id.clone(),
        description: format!("{}: {}", template.name, name),
        name,
        expected_duration_minutes: modifier.phase_duration,
        key_vocabulary: chunk(&vocabulary, i, n),
        essential_phrases: chunk(&phrases, i, n),
        learning_objectives: objectives,
        cultural_notes: if i == 0 { notes.clone() } else { None },
        success_criteria: Vec::new(),
      }
    })
    .collect();

  let variation_tag = variation.map(|v| v.id.as_str()).unwrap_or("standard");
  let now = Utc::now();
  Ok(ConversationScenario {
    scenario_id: format!("{}_{}_{}_{}", template.template_id, difficulty.as_str(), variation_tag, short_uuid()),
    name: match variation {
      Some(v) => format!("{} - {}", template.name, title_case(&v.id)),
      None => template.name.clone(),
    },
    category: template.category,
    difficulty,
    description: variation
      .map(|v| v.description.clone())
      .filter(|d| !d.is_empty())
      .unwrap_or_else(|| format!("Tier {} {} practice", template.tier, template.name)),
    user_role,
    ai_role,
    setting: variation
      .map(|v| v.setting.clone())
      .filter(|s| !s.is_empty())
      .unwrap_or_else(|| format!("A typical {} setting", template.category.as_str().replace('_', " "))),
    duration_minutes: modifier.duration,
    phases,
    vocabulary_focus: vocabulary,
    cultural_context: template.cultural_context.clone(),
    learning_goals: template.learning_objectives.clone(),
    learning_outcomes: template.success_metrics.clone(),
    prerequisites: modifier.prerequisites.clone(),
    is_active: true,
    created_at: now,
    updated_at: now,
  })
}
