//! Scenario store and conversation progress tracking.
//!
//! This module owns:
//!   - the scenario definitions (predefined, file-loaded, template-generated)
//!   - per-conversation progress, keyed by progress id
//!   - the JSON mirror of definitions for admin edits
//!
//! Lock order is always `persist_lock`, then `scenarios`, then `progress`, then `transient`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, instrument, warn};

use crate::domain::{
    ConversationRole, ConversationScenario, ScenarioCategory, ScenarioDifficulty, ScenarioProgress,
};
use crate::scenario_io;
use crate::scoring::{analyze_message, check_phase_completion, PhaseCompletion};
use crate::seeds::predefined_scenarios;
use crate::templates::{FactoryError, ScenarioFactory};
use crate::util::short_uuid;

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("Scenario {0} not found")]
    ScenarioNotFound(String),
    #[error("Scenario progress {0} not found")]
    ProgressNotFound(String),
    #[error("Invalid scenario: {0}")]
    Invalid(String),
    #[error(transparent)]
    Factory(#[from] FactoryError),
}

// ---------- Response shapes ----------

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioSummary {
    pub scenario_id: String,
    pub name: String,
    pub category: ScenarioCategory,
    pub difficulty: ScenarioDifficulty,
    pub description: String,
    pub duration_minutes: u32,
    pub user_role: ConversationRole,
    pub ai_role: ConversationRole,
    pub setting: String,
    pub vocabulary_count: usize,
    pub phase_count: usize,
    pub learning_goals: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryInfo {
    pub category: ScenarioCategory,
    pub name: String,
    pub scenario_count: usize,
    pub template_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TemplateSummary {
    pub template_id: String,
    pub name: String,
    pub category: ScenarioCategory,
    pub tier: u8,
    pub description: String,
    pub vocabulary_count: usize,
    pub variations: usize,
    pub learning_objectives: Vec<String>,
    pub conversation_starters: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryScenarioEntry {
    pub scenario_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub difficulty: ScenarioDifficulty,
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryTemplateEntry {
    pub template_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub tier: u8,
    pub description: String,
    pub variations: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryListing {
    pub category: ScenarioCategory,
    pub predefined_scenarios: Vec<CategoryScenarioEntry>,
    pub universal_templates: Vec<CategoryTemplateEntry>,
    pub total_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartedScenario {
    pub progress_id: String,
    pub scenario: String,
    pub current_phase: String,
    pub setting: String,
    pub your_role: ConversationRole,
    pub ai_role: ConversationRole,
    pub opening_message: String,
    pub phase_objectives: Vec<String>,
    pub key_vocabulary: Vec<String>,
    pub cultural_context: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NextPhaseInfo {
    pub phase_name: String,
    pub description: String,
    pub objectives: Vec<String>,
    pub vocabulary: Vec<String>,
    pub essential_phrases: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageOutcome {
    pub progress_id: String,
    pub current_phase: String,
    pub phase_completion: PhaseCompletion,
    pub overall_completion: f64,
    pub vocabulary_progress: Vec<String>,
    pub objectives_met: Vec<String>,
    pub learning_feedback: Vec<String>,
    pub next_phase: Option<NextPhaseInfo>,
    pub scenario_complete: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PhasePosition {
    pub name: String,
    pub description: String,
    pub phase_number: usize,
    pub total_phases: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub duration_minutes: f64,
    pub completion_percentage: f64,
    pub vocabulary_mastered: usize,
    pub objectives_completed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct LearningProgress {
    pub vocabulary_mastered: Vec<String>,
    pub objectives_completed: Vec<String>,
    pub success_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressReport {
    pub progress_id: String,
    pub scenario_name: String,
    pub current_phase: PhasePosition,
    pub session_stats: SessionStats,
    pub learning_progress: LearningProgress,
}

#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    pub scenario_id: String,
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletionStats {
    pub duration_minutes: f64,
    pub phases_completed: usize,
    pub total_phases: usize,
    pub completion_rate: f64,
    pub vocabulary_learned: usize,
    pub objectives_achieved: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct LearningAchievements {
    pub vocabulary_mastered: Vec<String>,
    pub skills_practiced: Vec<String>,
    pub cultural_insights: Vec<serde_json::Value>,
    pub next_recommendations: Vec<Recommendation>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceFeedback {
    pub success_rate: f64,
    pub engagement_level: &'static str,
    pub difficulty_assessment: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletionSummary {
    pub progress_id: String,
    pub scenario_completed: String,
    pub completion_stats: CompletionStats,
    pub learning_achievements: LearningAchievements,
    pub performance_feedback: PerformanceFeedback,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioStatistics {
    pub total_scenarios: usize,
    pub active_scenarios: usize,
    pub inactive_scenarios: usize,
    pub total_phases: usize,
    pub total_templates: usize,
    pub active_sessions: usize,
    pub by_category: BTreeMap<String, usize>,
    pub by_difficulty: BTreeMap<String, usize>,
}

/// Everything the reply generator needs about a live conversation.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub user_id: String,
    pub scenario: ConversationScenario,
    pub phase_index: usize,
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn minutes_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    round2((end - start).num_milliseconds() as f64 / 60_000.0)
}

fn push_unique(into: &mut Vec<String>, items: &[String]) {
    for item in items {
        if !into.contains(item) {
            into.push(item.clone());
        }
    }
}

fn validate(scenario: &ConversationScenario) -> Result<(), ScenarioError> {
    if scenario.scenario_id.trim().is_empty() {
        return Err(ScenarioError::Invalid("scenario_id must not be blank".into()));
    }
    if scenario.name.trim().is_empty() {
        return Err(ScenarioError::Invalid("name must not be blank".into()));
    }
    if scenario.duration_minutes == 0 {
        return Err(ScenarioError::Invalid("duration_minutes must be positive".into()));
    }
    if scenario.phases.is_empty() {
        return Err(ScenarioError::Invalid("at least one phase is required".into()));
    }
    Ok(())
}

fn opening_message(scenario: &ConversationScenario) -> String {
    let first = &scenario.phases[0];
    let user = scenario.user_role.as_str().replace('_', " ");
    let ai = scenario.ai_role.as_str().replace('_', " ");
    let task = first.description.to_lowercase();
    let base = match scenario.category {
        ScenarioCategory::Restaurant => format!(
            "Welcome! You are now at {}. As a {user}, you want to {task}. I'm the {ai} here to help you. How may I assist you today?",
            scenario.setting
        ),
        ScenarioCategory::Travel => format!(
            "Hello! You've just arrived at {}. As a {user}, you need to {task}. I'm here as the {ai} to help you. What can I do for you?",
            scenario.setting
        ),
        ScenarioCategory::Shopping => format!(
            "Good day! Welcome to our store. You're here as a {user} looking to {task}. I'm a {ai} ready to help. What are you looking for today?"
        ),
        ScenarioCategory::Business => format!(
            "Good morning! Welcome to our {}. In your role as {user}, you're here to {task}. As the {ai}, I'm pleased to meet with you. Shall we begin?",
            scenario.setting
        ),
        other => format!(
            "Welcome to this {} scenario! You are a {user} and I am the {ai}. Let's begin this conversation practice.",
            other.as_str().replace('_', " ")
        ),
    };

    let mut msg = base;
    if !first.key_vocabulary.is_empty() {
        let head: Vec<&str> = first.key_vocabulary.iter().take(5).map(String::as_str).collect();
        msg.push_str("\n\nKey vocabulary for this phase: ");
        msg.push_str(&head.join(", "));
        if first.key_vocabulary.len() > 5 {
            msg.push_str("...");
        }
    }
    if let Some(note) = &first.cultural_notes {
        msg.push_str("\n\nCultural note: ");
        msg.push_str(note);
    }
    msg
}

/// Clamp or drop live progress after a definition changed. `None` means the scenario is gone.
/// Returns how many progress records were touched.
fn reconcile_progress(
    progress: &mut HashMap<String, ScenarioProgress>,
    scenario_id: &str,
    phase_count: Option<usize>,
) -> usize {
    match phase_count {
        None => {
            let before = progress.len();
            progress.retain(|_, p| p.scenario_id != scenario_id);
            before - progress.len()
        }
        Some(n) => {
            let last = n.saturating_sub(1);
            let mut clamped = 0;
            for p in progress.values_mut().filter(|p| p.scenario_id == scenario_id && p.current_phase > last) {
                p.current_phase = last;
                clamped += 1;
            }
            clamped
        }
    }
}

pub struct ScenarioManager {
    scenarios: RwLock<HashMap<String, ConversationScenario>>,
    progress: RwLock<HashMap<String, ScenarioProgress>>,
    /// Ids stamped from templates; served from memory, never written to the file.
    transient: RwLock<HashSet<String>>,
    /// Serializes snapshot + write so the file always reflects the latest edit.
    persist_lock: Mutex<()>,
    factory: Arc<ScenarioFactory>,
    file: PathBuf,
}

impl ScenarioManager {
    /// Store seeded with the predefined scenarios. Call `initialize` to merge the file.
    pub fn new(file: PathBuf, factory: Arc<ScenarioFactory>) -> Self {
        let scenarios = predefined_scenarios()
            .into_iter()
            .map(|s| (s.scenario_id.clone(), s))
            .collect::<HashMap<_, _>>();
        info!(target: "scenario", count = scenarios.len(), "Loaded predefined scenarios");
        Self {
            scenarios: RwLock::new(scenarios),
            progress: RwLock::new(HashMap::new()),
            transient: RwLock::new(HashSet::new()),
            persist_lock: Mutex::new(()),
            factory,
            file,
        }
    }

    /// Merge definitions from the JSON file; file entries replace predefined ones.
    #[instrument(level = "info", skip(self), fields(file = %self.file.display()))]
    pub async fn initialize(&self) {
        let loaded = scenario_io::load_all(&self.file).await;
        let mut scenarios = self.scenarios.write().await;
        let n = loaded.len();
        scenarios.extend(loaded);
        info!(target: "scenario", from_file = n, total = scenarios.len(), "Scenario store initialized");
    }

    async fn persist(&self) {
        let _guard = self.persist_lock.lock().await;
        let snapshot: HashMap<String, ConversationScenario> = {
            let scenarios = self.scenarios.read().await;
            let transient = self.transient.read().await;
            scenarios
                .iter()
                .filter(|(id, _)| !transient.contains(*id))
                .map(|(id, s)| (id.clone(), s.clone()))
                .collect()
        };
        scenario_io::save_all(&self.file, &snapshot).await;
    }

    // ---------- Browsing ----------

    pub async fn list_available(
        &self,
        category: Option<ScenarioCategory>,
        difficulty: Option<ScenarioDifficulty>,
    ) -> Vec<ScenarioSummary> {
        let scenarios = self.scenarios.read().await;
        let mut out: Vec<ScenarioSummary> = scenarios
            .values()
            .filter(|s| s.is_active)
            .filter(|s| category.map_or(true, |c| s.category == c))
            .filter(|s| difficulty.map_or(true, |d| s.difficulty == d))
            .map(|s| ScenarioSummary {
                scenario_id: s.scenario_id.clone(),
                name: s.name.clone(),
                category: s.category,
                difficulty: s.difficulty,
                description: s.description.clone(),
                duration_minutes: s.duration_minutes,
                user_role: s.user_role,
                ai_role: s.ai_role,
                setting: s.setting.clone(),
                vocabulary_count: s.vocabulary_focus.len(),
                phase_count: s.phases.len(),
                learning_goals: s.learning_goals.iter().take(3).cloned().collect(),
            })
            .collect();
        out.sort_by(|a, b| a.scenario_id.cmp(&b.scenario_id));
        out
    }

    pub async fn details(&self, scenario_id: &str) -> Option<ConversationScenario> {
        self.scenarios.read().await.get(scenario_id).cloned()
    }

    pub async fn categories(&self) -> Vec<CategoryInfo> {
        let scenarios = self.scenarios.read().await;
        ScenarioCategory::ALL
            .iter()
            .map(|&c| CategoryInfo {
                category: c,
                name: crate::util::title_case(c.as_str()),
                scenario_count: scenarios.values().filter(|s| s.is_active && s.category == c).count(),
                template_count: self.factory.by_category(c).len(),
            })
            .collect()
    }

    pub async fn by_category(&self, category: ScenarioCategory) -> CategoryListing {
        let scenarios = self.scenarios.read().await;
        let mut predefined: Vec<CategoryScenarioEntry> = scenarios
            .values()
            .filter(|s| s.is_active && s.category == category)
            .map(|s| CategoryScenarioEntry {
                scenario_id: s.scenario_id.clone(),
                name: s.name.clone(),
                kind: "predefined",
                difficulty: s.difficulty,
                description: s.description.clone(),
            })
            .collect();
        predefined.sort_by(|a, b| a.scenario_id.cmp(&b.scenario_id));

        let templates: Vec<CategoryTemplateEntry> = self
            .factory
            .by_category(category)
            .into_iter()
            .map(|t| CategoryTemplateEntry {
                template_id: t.template_id.clone(),
                name: t.name.clone(),
                kind: "template",
                tier: t.tier,
                description: format!("Tier {} - {} (customizable)", t.tier, t.name),
                variations: t.scenario_variations.len(),
            })
            .collect();

        CategoryListing {
            category,
            total_count: predefined.len() + templates.len(),
            predefined_scenarios: predefined,
            universal_templates: templates,
        }
    }

    pub fn universal_templates(&self, tier: Option<u8>) -> Vec<TemplateSummary> {
        self.factory
            .by_tier(tier)
            .into_iter()
            .map(|t| TemplateSummary {
                template_id: t.template_id.clone(),
                name: t.name.clone(),
                category: t.category,
                tier: t.tier,
                description: format!("Tier {} - {}", t.tier, t.name),
                vocabulary_count: t.base_vocabulary.len(),
                variations: t.scenario_variations.len(),
                learning_objectives: t.learning_objectives.iter().take(3).cloned().collect(),
                conversation_starters: t.conversation_starters.iter().take(2).cloned().collect(),
            })
            .collect()
    }

    /// Stamp a scenario out of a template and make it available immediately.
    #[instrument(level = "info", skip(self))]
    pub async fn create_from_template(
        &self,
        template_id: &str,
        difficulty: ScenarioDifficulty,
        user_role: ConversationRole,
        ai_role: ConversationRole,
        variation_id: Option<&str>,
    ) -> Result<ConversationScenario, ScenarioError> {
        let scenario = self
            .factory
            .create_scenario(template_id, difficulty, user_role, ai_role, variation_id)?;
        self.scenarios
            .write()
            .await
            .insert(scenario.scenario_id.clone(), scenario.clone());
        self.transient.write().await.insert(scenario.scenario_id.clone());
        info!(target: "scenario", %template_id, scenario_id = %scenario.scenario_id, "Created scenario from template");
        Ok(scenario)
    }

    // ---------- Conversation lifecycle ----------

    #[instrument(level = "info", skip(self))]
    pub async fn start(&self, user_id: &str, scenario_id: &str) -> Result<StartedScenario, ScenarioError> {
        let scenarios = self.scenarios.read().await;
        let scenario = scenarios
            .get(scenario_id)
            .filter(|s| s.is_active)
            .ok_or_else(|| ScenarioError::ScenarioNotFound(scenario_id.to_string()))?;
        let first = scenario
            .phases
            .first()
            .ok_or_else(|| ScenarioError::Invalid(format!("scenario {} has no phases", scenario_id)))?;

        let now = Utc::now();
        let progress_id = format!("{}_{}_{}_{}", user_id, scenario_id, now.timestamp(), short_uuid());
        let progress = ScenarioProgress {
            progress_id: progress_id.clone(),
            scenario_id: scenario_id.to_string(),
            user_id: user_id.to_string(),
            current_phase: 0,
            phase_progress: HashMap::new(),
            vocabulary_mastered: Vec::new(),
            objectives_completed: Vec::new(),
            start_time: now,
            last_activity: now,
            total_attempts: 1,
            success_rate: 0.0,
            scored_messages: 0,
        };

        let started = StartedScenario {
            progress_id: progress_id.clone(),
            scenario: scenario.name.clone(),
            current_phase: first.name.clone(),
            setting: scenario.setting.clone(),
            your_role: scenario.user_role,
            ai_role: scenario.ai_role,
            opening_message: opening_message(scenario),
            phase_objectives: first.learning_objectives.clone(),
            key_vocabulary: first.key_vocabulary.clone(),
            cultural_context: scenario.cultural_context.clone(),
        };

        self.progress.write().await.insert(progress_id.clone(), progress);
        info!(target: "scenario", %user_id, %scenario_id, %progress_id, "Started scenario");
        Ok(started)
    }

    pub async fn owner_of(&self, progress_id: &str) -> Option<String> {
        self.progress.read().await.get(progress_id).map(|p| p.user_id.clone())
    }

    pub async fn session_context(&self, progress_id: &str) -> Option<SessionContext> {
        let scenarios = self.scenarios.read().await;
        let progress = self.progress.read().await;
        let p = progress.get(progress_id)?;
        let scenario = scenarios.get(&p.scenario_id)?;
        Some(SessionContext {
            user_id: p.user_id.clone(),
            scenario: scenario.clone(),
            phase_index: p.current_phase,
        })
    }

    #[instrument(level = "info", skip(self, user_message, _ai_response), fields(%progress_id, msg_len = user_message.len()))]
    pub async fn process_message(
        &self,
        progress_id: &str,
        user_message: &str,
        _ai_response: &str,
    ) -> Result<MessageOutcome, ScenarioError> {
        let scenarios = self.scenarios.read().await;
        let mut all_progress = self.progress.write().await;
        let progress = all_progress
            .get_mut(progress_id)
            .ok_or_else(|| ScenarioError::ProgressNotFound(progress_id.to_string()))?;
        let scenario = scenarios
            .get(&progress.scenario_id)
            .ok_or_else(|| ScenarioError::ScenarioNotFound(progress.scenario_id.clone()))?;
        let total = scenario.phases.len();
        if total == 0 {
            return Err(ScenarioError::Invalid(format!("scenario {} has no phases", scenario.scenario_id)));
        }
        let index = progress.current_phase.min(total - 1);
        let phase = &scenario.phases[index];

        let analysis = analyze_message(user_message, phase);
        let completion = check_phase_completion(&analysis, phase);

        progress.last_activity = Utc::now();
        progress.total_attempts += 1;
        push_unique(&mut progress.vocabulary_mastered, &analysis.vocabulary_used);
        push_unique(&mut progress.objectives_completed, &analysis.objectives_addressed);
        let pct = completion.completion_score * 100.0;
        let entry = progress.phase_progress.entry(phase.phase_id.clone()).or_insert(0.0);
        *entry = entry.max(pct);
        progress.scored_messages += 1;
        progress.success_rate += (completion.completion_score - progress.success_rate) / progress.scored_messages as f64;

        let mut next_phase = None;
        if completion.is_complete && index + 1 < total {
            progress.current_phase = index + 1;
            let next = &scenario.phases[index + 1];
            next_phase = Some(NextPhaseInfo {
                phase_name: next.name.clone(),
                description: next.description.clone(),
                objectives: next.learning_objectives.clone(),
                vocabulary: next.key_vocabulary.clone(),
                essential_phrases: next.essential_phrases.clone(),
            });
            info!(target: "scenario", %progress_id, phase = %next.phase_id, "Advanced to next phase");
        }
        let scenario_complete = completion.is_complete && index + 1 == total;

        Ok(MessageOutcome {
            progress_id: progress_id.to_string(),
            current_phase: phase.name.clone(),
            overall_completion: (progress.current_phase + 1) as f64 / total as f64,
            vocabulary_progress: analysis.vocabulary_used,
            objectives_met: analysis.objectives_addressed,
            learning_feedback: analysis.learning_feedback,
            phase_completion: completion,
            next_phase,
            scenario_complete,
        })
    }

    pub async fn progress(&self, progress_id: &str) -> Option<ProgressReport> {
        let scenarios = self.scenarios.read().await;
        let all_progress = self.progress.read().await;
        let p = all_progress.get(progress_id)?;
        let scenario = scenarios.get(&p.scenario_id)?;
        let total = scenario.phases.len();
        let phase = scenario.phases.get(p.current_phase)?;

        Some(ProgressReport {
            progress_id: progress_id.to_string(),
            scenario_name: scenario.name.clone(),
            current_phase: PhasePosition {
                name: phase.name.clone(),
                description: phase.description.clone(),
                phase_number: p.current_phase + 1,
                total_phases: total,
            },
            session_stats: SessionStats {
                duration_minutes: minutes_between(p.start_time, Utc::now()),
                completion_percentage: (p.current_phase + 1) as f64 / total as f64 * 100.0,
                vocabulary_mastered: p.vocabulary_mastered.len(),
                objectives_completed: p.objectives_completed.len(),
            },
            learning_progress: LearningProgress {
                vocabulary_mastered: p.vocabulary_mastered.clone(),
                objectives_completed: p.objectives_completed.clone(),
                success_rate: p.success_rate,
            },
        })
    }

    fn recommendations(
        scenarios: &HashMap<String, ConversationScenario>,
        done: &ConversationScenario,
    ) -> Vec<Recommendation> {
        let mut ordered: Vec<&ConversationScenario> = scenarios.values().filter(|s| s.is_active).collect();
        ordered.sort_by(|a, b| a.scenario_id.cmp(&b.scenario_id));

        let mut out: Vec<Recommendation> = ordered
            .iter()
            .filter(|s| {
                s.category == done.category && s.difficulty > done.difficulty && s.scenario_id != done.scenario_id
            })
            .map(|s| Recommendation {
                scenario_id: s.scenario_id.clone(),
                name: s.name.clone(),
                reason: format!("Advanced {} practice", s.category.as_str()),
            })
            .collect();
        for s in ordered.iter().filter(|s| s.category != done.category && s.difficulty == done.difficulty) {
            if out.len() >= 3 {
                break;
            }
            out.push(Recommendation {
                scenario_id: s.scenario_id.clone(),
                name: s.name.clone(),
                reason: format!("Practice {} skills", s.category.as_str()),
            });
        }
        out.truncate(3);
        out
    }

    /// Summarize and drop the progress record.
    #[instrument(level = "info", skip(self))]
    pub async fn complete(&self, progress_id: &str) -> Result<CompletionSummary, ScenarioError> {
        let scenarios = self.scenarios.read().await;
        let mut all_progress = self.progress.write().await;
        let p = all_progress
            .get(progress_id)
            .ok_or_else(|| ScenarioError::ProgressNotFound(progress_id.to_string()))?;
        let scenario = scenarios
            .get(&p.scenario_id)
            .ok_or_else(|| ScenarioError::ScenarioNotFound(p.scenario_id.clone()))?;
        let total = scenario.phases.len().max(1);
        let duration = minutes_between(p.start_time, Utc::now());
        let completed = (p.current_phase + 1).min(total);
        let completion_rate = completed as f64 / total as f64;

        let summary = CompletionSummary {
            progress_id: progress_id.to_string(),
            scenario_completed: scenario.name.clone(),
            completion_stats: CompletionStats {
                duration_minutes: duration,
                phases_completed: completed,
                total_phases: scenario.phases.len(),
                completion_rate: (completion_rate * 1000.0).round() / 10.0,
                vocabulary_learned: p.vocabulary_mastered.len(),
                objectives_achieved: p.objectives_completed.len(),
            },
            learning_achievements: LearningAchievements {
                vocabulary_mastered: p.vocabulary_mastered.clone(),
                skills_practiced: scenario.phases.iter().take(completed).map(|ph| ph.name.clone()).collect(),
                cultural_insights: scenario.cultural_context.values().take(2).cloned().collect(),
                next_recommendations: Self::recommendations(&scenarios, scenario),
            },
            performance_feedback: PerformanceFeedback {
                success_rate: p.success_rate,
                engagement_level: if duration >= scenario.duration_minutes as f64 * 0.8 { "high" } else { "moderate" },
                difficulty_assessment: if completion_rate >= 0.7 { "appropriate" } else { "challenging" },
            },
        };

        let user_id = p.user_id.clone();
        all_progress.remove(progress_id);
        info!(target: "scenario", scenario_id = %scenario.scenario_id, %user_id, "Completed scenario");
        Ok(summary)
    }

    // ---------- Admin ----------

    pub async fn all(&self) -> Vec<ConversationScenario> {
        let mut out: Vec<_> = self.scenarios.read().await.values().cloned().collect();
        out.sort_by(|a, b| a.scenario_id.cmp(&b.scenario_id));
        out
    }

    pub async fn get(&self, scenario_id: &str) -> Option<ConversationScenario> {
        self.details(scenario_id).await
    }

    /// Validate, store and persist. Creates or replaces.
    #[instrument(level = "info", skip(self, scenario), fields(scenario_id = %scenario.scenario_id))]
    pub async fn save(&self, mut scenario: ConversationScenario) -> Result<ConversationScenario, ScenarioError> {
        if let Err(e) = validate(&scenario) {
            warn!(target: "scenario", error = %e, "Scenario validation failed");
            return Err(e);
        }
        scenario.updated_at = Utc::now();
        {
            let mut scenarios = self.scenarios.write().await;
            scenarios.insert(scenario.scenario_id.clone(), scenario.clone());
            let mut progress = self.progress.write().await;
            let clamped = reconcile_progress(&mut progress, &scenario.scenario_id, Some(scenario.phases.len()));
            if clamped > 0 {
                info!(target: "scenario", clamped, "Clamped live progress to the new phase count");
            }
        }
        // an explicit admin save makes a template-stamped scenario durable
        self.transient.write().await.remove(&scenario.scenario_id);
        self.persist().await;
        info!(target: "scenario", name = %scenario.name, "Saved scenario");
        Ok(scenario)
    }

    /// Replace an existing scenario; the path id wins over the body id.
    pub async fn update(&self, scenario_id: &str, mut scenario: ConversationScenario) -> Result<ConversationScenario, ScenarioError> {
        let created_at = self
            .scenarios
            .read()
            .await
            .get(scenario_id)
            .map(|s| s.created_at)
            .ok_or_else(|| ScenarioError::ScenarioNotFound(scenario_id.to_string()))?;
        scenario.scenario_id = scenario_id.to_string();
        scenario.created_at = created_at;
        self.save(scenario).await
    }

    #[instrument(level = "info", skip(self))]
    pub async fn delete(&self, scenario_id: &str) -> bool {
        let (removed, dropped) = {
            let mut scenarios = self.scenarios.write().await;
            let removed = scenarios.remove(scenario_id);
            let dropped = match removed {
                Some(_) => reconcile_progress(&mut *self.progress.write().await, scenario_id, None),
                None => 0,
            };
            (removed, dropped)
        };
        match removed {
            Some(s) => {
                self.transient.write().await.remove(scenario_id);
                self.persist().await;
                info!(target: "scenario", %scenario_id, name = %s.name, dropped_sessions = dropped, "Deleted scenario");
                true
            }
            None => {
                warn!(target: "scenario", %scenario_id, "Scenario not found for deletion");
                false
            }
        }
    }

    #[instrument(level = "info", skip(self))]
    pub async fn set_active(&self, scenario_id: &str, is_active: bool) -> bool {
        let found = {
            let mut scenarios = self.scenarios.write().await;
            match scenarios.get_mut(scenario_id) {
                Some(s) => {
                    s.is_active = is_active;
                    s.updated_at = Utc::now();
                    true
                }
                None => false,
            }
        };
        if found {
            self.persist().await;
        }
        found
    }

    pub async fn statistics(&self) -> ScenarioStatistics {
        let scenarios = self.scenarios.read().await;
        let active_sessions = self.progress.read().await.len();
        let mut by_category = BTreeMap::new();
        let mut by_difficulty = BTreeMap::new();
        for s in scenarios.values() {
            *by_category.entry(s.category.as_str().to_string()).or_insert(0) += 1;
            *by_difficulty.entry(s.difficulty.as_str().to_string()).or_insert(0) += 1;
        }
        let active = scenarios.values().filter(|s| s.is_active).count();
        ScenarioStatistics {
            total_scenarios: scenarios.len(),
            active_scenarios: active,
            inactive_scenarios: scenarios.len() - active,
            total_phases: scenarios.values().map(|s| s.phases.len()).sum(),
            total_templates: self.factory.all().len(),
            active_sessions,
            by_category,
            by_difficulty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(dir: &tempfile::TempDir) -> ScenarioManager {
        let factory = Arc::new(ScenarioFactory::load(None));
        ScenarioManager::new(dir.path().join("scenarios.json"), factory)
    }

    #[tokio::test]
    async fn lists_active_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(&dir);
        let all = m.list_available(None, None).await;
        let ids: Vec<&str> = all.iter().map(|s| s.scenario_id.as_str()).collect();
        assert_eq!(ids, vec!["clothing_shopping", "hotel_check_in", "restaurant_dinner_reservation"]);
        assert_eq!(all[2].learning_goals.len(), 3);

        let beginners = m.list_available(None, Some(ScenarioDifficulty::Beginner)).await;
        assert_eq!(beginners.len(), 2);
        let travel = m.list_available(Some(ScenarioCategory::Travel), None).await;
        assert_eq!(travel.len(), 1);

        assert!(m.set_active("hotel_check_in", false).await);
        assert!(m.list_available(Some(ScenarioCategory::Travel), None).await.is_empty());
        assert!(matches!(
            m.start("u1", "hotel_check_in").await,
            Err(ScenarioError::ScenarioNotFound(_))
        ));
    }

    #[tokio::test]
    async fn start_builds_opening_and_progress() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(&dir);
        let started = m.start("u1", "restaurant_dinner_reservation").await.unwrap();
        assert!(started.progress_id.starts_with("u1_restaurant_dinner_reservation_"));
        assert_eq!(started.current_phase, "Making the Reservation");
        assert!(started.opening_message.starts_with("Welcome! You are now at An upscale restaurant"));
        assert!(started.opening_message.contains("Key vocabulary for this phase: reservation, table, party, time, available"));
        assert!(started.opening_message.contains("Cultural note:"));
        assert_eq!(m.owner_of(&started.progress_id).await.as_deref(), Some("u1"));

        let report = m.progress(&started.progress_id).await.unwrap();
        assert_eq!(report.current_phase.phase_number, 1);
        assert_eq!(report.current_phase.total_phases, 4);
        assert_eq!(report.session_stats.completion_percentage, 25.0);

        assert!(matches!(m.start("u1", "nope").await, Err(ScenarioError::ScenarioNotFound(_))));
    }

    #[tokio::test]
    async fn messages_advance_one_phase_at_a_time() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(&dir);
        let pid = m.start("u1", "restaurant_dinner_reservation").await.unwrap().progress_id;

        // "reservation" and "party" cover all three criteria
        let out = m
            .process_message(&pid, "I'd like to make a reservation for a party of two", "")
            .await
            .unwrap();
        assert!(out.phase_completion.is_complete);
        assert_eq!(out.current_phase, "Making the Reservation");
        assert_eq!(out.next_phase.as_ref().unwrap().phase_name, "Arrival and Seating");
        assert_eq!(out.overall_completion, 0.5);
        assert!(!out.scenario_complete);

        // A message that misses everything does not move the phase
        let out = m.process_message(&pid, "ok", "").await.unwrap();
        assert!(!out.phase_completion.is_complete);
        assert!(out.next_phase.is_none());

        let report = m.progress(&pid).await.unwrap();
        assert_eq!(report.current_phase.phase_number, 2);
        assert!(report.learning_progress.vocabulary_mastered.contains(&"reservation".to_string()));
        // mean of 1.0 and 0.0
        assert!((report.learning_progress.success_rate - 0.5).abs() < 1e-9);

        assert!(matches!(
            m.process_message("missing", "hi", "").await,
            Err(ScenarioError::ProgressNotFound(_))
        ));
    }

    #[tokio::test]
    async fn last_phase_completion_marks_scenario_complete() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(&dir);
        let mut s = m.get("restaurant_dinner_reservation").await.unwrap();
        s.scenario_id = "one_phase".into();
        s.phases.truncate(1);
        m.save(s).await.unwrap();

        let pid = m.start("u1", "one_phase").await.unwrap().progress_id;
        let out = m.process_message(&pid, "a reservation for a party of four", "").await.unwrap();
        assert!(out.phase_completion.is_complete);
        assert!(out.scenario_complete);
        assert!(out.next_phase.is_none());
    }

    #[tokio::test]
    async fn complete_summarizes_and_removes() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(&dir);
        let pid = m.start("u2", "restaurant_dinner_reservation").await.unwrap().progress_id;
        let summary = m.complete(&pid).await.unwrap();
        assert_eq!(summary.completion_stats.phases_completed, 1);
        assert_eq!(summary.completion_stats.completion_rate, 25.0);
        assert_eq!(summary.learning_achievements.skills_practiced, vec!["Making the Reservation".to_string()]);
        assert_eq!(summary.learning_achievements.cultural_insights.len(), 2);
        assert_eq!(summary.performance_feedback.difficulty_assessment, "challenging");
        assert_eq!(summary.performance_feedback.engagement_level, "moderate");
        // beginner restaurant: no harder restaurant scenario, so the other beginner category is offered
        let recs = &summary.learning_achievements.next_recommendations;
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].scenario_id, "clothing_shopping");
        assert!(m.progress(&pid).await.is_none());
        assert!(matches!(m.complete(&pid).await, Err(ScenarioError::ProgressNotFound(_))));
    }

    #[tokio::test]
    async fn recommendations_prefer_harder_same_category() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(&dir);
        let mut harder = m.get("restaurant_dinner_reservation").await.unwrap();
        harder.scenario_id = "restaurant_advanced".into();
        harder.difficulty = ScenarioDifficulty::Advanced;
        m.save(harder).await.unwrap();

        let pid = m.start("u1", "restaurant_dinner_reservation").await.unwrap().progress_id;
        let recs = m.complete(&pid).await.unwrap().learning_achievements.next_recommendations;
        assert_eq!(recs[0].scenario_id, "restaurant_advanced");
        assert_eq!(recs[0].reason, "Advanced restaurant practice");
        assert_eq!(recs[1].scenario_id, "clothing_shopping");
    }

    #[tokio::test]
    async fn admin_crud_persists_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(&dir);

        let mut bad = m.get("hotel_check_in").await.unwrap();
        bad.phases.clear();
        assert!(matches!(m.save(bad).await, Err(ScenarioError::Invalid(_))));

        let mut s = m.get("hotel_check_in").await.unwrap();
        s.name = "Hotel Arrival".into();
        let saved = m.update("hotel_check_in", s).await.unwrap();
        assert_eq!(saved.name, "Hotel Arrival");
        assert!(matches!(
            m.update("ghost", saved.clone()).await,
            Err(ScenarioError::ScenarioNotFound(_))
        ));

        let on_disk = scenario_io::load_all(&dir.path().join("scenarios.json")).await;
        assert_eq!(on_disk["hotel_check_in"].name, "Hotel Arrival");

        assert!(m.delete("clothing_shopping").await);
        assert!(!m.delete("clothing_shopping").await);
        assert!(!m.set_active("clothing_shopping", true).await);

        let stats = m.statistics().await;
        assert_eq!(stats.total_scenarios, 2);
        assert_eq!(stats.total_phases, 7);
        assert_eq!(stats.by_category.get("travel"), Some(&1));

        // a fresh manager picks up the edited file
        let reloaded = manager(&dir);
        reloaded.initialize().await;
        assert_eq!(reloaded.get("hotel_check_in").await.unwrap().name, "Hotel Arrival");
    }

    #[tokio::test]
    async fn admin_edits_keep_live_progress_consistent() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(&dir);
        let pid = m.start("u1", "restaurant_dinner_reservation").await.unwrap().progress_id;
        let out = m
            .process_message(&pid, "I'd like to make a reservation for a party of two", "")
            .await
            .unwrap();
        assert!(out.next_phase.is_some());
        assert_eq!(m.progress(&pid).await.unwrap().current_phase.phase_number, 2);

        let mut shorter = m.get("restaurant_dinner_reservation").await.unwrap();
        shorter.phases.truncate(1);
        m.update("restaurant_dinner_reservation", shorter).await.unwrap();

        let report = m.progress(&pid).await.unwrap();
        assert_eq!(report.current_phase.phase_number, 1);
        assert_eq!(report.current_phase.total_phases, 1);
        assert_eq!(m.session_context(&pid).await.unwrap().phase_index, 0);
        assert!(m.process_message(&pid, "a table please", "").await.is_ok());

        let other = m.start("u2", "hotel_check_in").await.unwrap().progress_id;
        assert!(m.delete("restaurant_dinner_reservation").await);
        assert!(m.owner_of(&pid).await.is_none());
        assert!(matches!(
            m.process_message(&pid, "hello", "").await,
            Err(ScenarioError::ProgressNotFound(_))
        ));
        assert_eq!(m.owner_of(&other).await.as_deref(), Some("u2"));
        assert_eq!(m.statistics().await.active_sessions, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_saves_all_reach_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let m = Arc::new(manager(&dir));
        let base = m.get("hotel_check_in").await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..8 {
            let m = m.clone();
            let mut s = base.clone();
            s.scenario_id = format!("hotel_copy_{i}");
            tasks.push(tokio::spawn(async move { m.save(s).await.map(|_| ()) }));
        }
        for t in tasks {
            t.await.unwrap().unwrap();
        }

        let path = dir.path().join("scenarios.json");
        let on_disk = scenario_io::load_all(&path).await;
        assert_eq!(on_disk.len(), 3 + 8);
        assert!((0..8).all(|i| on_disk.contains_key(&format!("hotel_copy_{i}"))));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn template_scenarios_stay_out_of_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(&dir);
        let created = m
            .create_from_template(
                "restaurant_dining",
                ScenarioDifficulty::Beginner,
                ConversationRole::Customer,
                ConversationRole::ServiceProvider,
                None,
            )
            .await
            .unwrap();

        assert!(m.set_active("hotel_check_in", true).await);
        let path = dir.path().join("scenarios.json");
        let on_disk = scenario_io::load_all(&path).await;
        assert!(on_disk.contains_key("hotel_check_in"));
        assert!(!on_disk.contains_key(&created.scenario_id));
        assert!(m.get(&created.scenario_id).await.is_some());

        // an explicit admin save makes it durable
        m.save(created.clone()).await.unwrap();
        assert!(scenario_io::load_all(&path).await.contains_key(&created.scenario_id));
    }

    #[tokio::test]
    async fn categories_and_templates() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(&dir);
        let cats = m.categories().await;
        assert_eq!(cats.len(), ScenarioCategory::ALL.len());
        let restaurant = cats.iter().find(|c| c.category == ScenarioCategory::Restaurant).unwrap();
        assert_eq!(restaurant.scenario_count, 1);
        assert_eq!(restaurant.template_count, 1);

        let listing = m.by_category(ScenarioCategory::Restaurant).await;
        assert_eq!(listing.total_count, 2);

        let tier1 = m.universal_templates(Some(1));
        assert!(tier1.iter().all(|t| t.tier == 1));
        assert!(tier1.iter().all(|t| t.conversation_starters.len() <= 2));

        let created = m
            .create_from_template(
                "restaurant_dining",
                ScenarioDifficulty::Intermediate,
                ConversationRole::Customer,
                ConversationRole::ServiceProvider,
                Some("casual_dining"),
            )
            .await
            .unwrap();
        assert!(m.details(&created.scenario_id).await.is_some());
        assert!(matches!(
            m.create_from_template("nope", ScenarioDifficulty::Beginner, ConversationRole::Student, ConversationRole::Teacher, None)
                .await,
            Err(ScenarioError::Factory(FactoryError::UnknownTemplate(_)))
        ));
    }
}
