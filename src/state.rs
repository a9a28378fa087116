//! Application state shared by every handler.
//!
//! This module owns:
//!   - the loaded configuration
//!   - the SQLite store (users, API usage, budgets)
//!   - the scenario manager (definitions + live progress)
//!   - the response cache
//!   - optional OpenAI client and the JWT keys

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, instrument};

use crate::auth::JwtKeys;
use crate::cache::ResponseCache;
use crate::config::AppConfig;
use crate::db::Database;
use crate::openai::OpenAI;
use crate::scenarios::ScenarioManager;
use crate::templates::ScenarioFactory;

pub struct AppState {
    pub config: AppConfig,
    pub db: Database,
    pub scenarios: ScenarioManager,
    pub cache: Mutex<ResponseCache>,
    pub openai: Option<OpenAI>,
    pub jwt: JwtKeys,
}

impl AppState {
    /// Build state from config: open the database, load templates and scenarios,
    /// init OpenAI from env.
    #[instrument(level = "info", skip_all)]
    pub async fn new(config: AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let db = Database::new(&config.server.database_path)?;

        let factory = Arc::new(ScenarioFactory::load(config.scenarios.templates_dir.as_deref()));
        let scenarios = ScenarioManager::new(config.scenarios.scenarios_file.clone(), factory);
        scenarios.initialize().await;

        let openai = OpenAI::from_env();
        if let Some(oa) = &openai {
            info!(target: "tutor_backend", base_url = %oa.base_url, model = %oa.model, "OpenAI enabled.");
        } else {
            info!(target: "tutor_backend", "OpenAI disabled (no OPENAI_API_KEY). Using local replies.");
        }

        Ok(Self {
            cache: Mutex::new(ResponseCache::new(&config.cache)),
            jwt: JwtKeys::new(&config.auth.jwt_secret, config.auth.access_token_minutes),
            db,
            scenarios,
            openai,
            config,
        })
    }

    /// In-memory database, scenarios file under `dir`, no OpenAI.
    #[cfg(test)]
    pub fn for_tests(dir: &std::path::Path) -> Self {
        let mut config = AppConfig::default();
        config.auth.jwt_secret = "test-secret".into();
        config.scenarios.scenarios_file = dir.join("scenarios.json");
        let factory = Arc::new(ScenarioFactory::load(None));
        Self {
            cache: Mutex::new(ResponseCache::new(&config.cache)),
            jwt: JwtKeys::new(&config.auth.jwt_secret, config.auth.access_token_minutes),
            db: Database::in_memory().expect("in-memory sqlite"),
            scenarios: ScenarioManager::new(config.scenarios.scenarios_file.clone(), factory),
            openai: None,
            config,
        }
    }
}
