//! Tutor Backend · conversational language practice API
//!
//! - Axum HTTP API: auth, budgets, scenarios, admin tools
//! - SQLite for users, API usage and budget state
//! - Optional OpenAI integration (via environment variables)
//! - Static SPA fallback (<static_dir>/index.html)
//!
//! Important env variables:
//!   APP_CONFIG_PATH      : path to TOML config (server, auth, budget, cache, prompts)
//!   PORT                 : u16 (default 3000)
//!   DATABASE_PATH        : SQLite file (default "data/tutor.db")
//!   SCENARIOS_FILE       : JSON mirror of scenario definitions
//!   TEMPLATES_DIR        : extra universal template TOML files
//!   JWT_SECRET           : HS256 signing secret
//!   ACCESS_TOKEN_MINUTES : token lifetime
//!   OPENAI_API_KEY       : enables OpenAI integration if present
//!   OPENAI_BASE_URL      : default "https://api.openai.com/v1"
//!   OPENAI_MODEL         : default "gpt-4o-mini"
//!   LOG_LEVEL            : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT           : "pretty" (default) or "json"

mod telemetry;
mod util;
mod error;
mod config;
mod domain;
mod db;
mod budget;
mod auth;
mod cache;
mod scoring;
mod seeds;
mod templates;
mod scenario_io;
mod scenarios;
mod openai;
mod logic;
mod protocol;
mod state;
mod routes;

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::{info, instrument};

use crate::config::AppConfig;
use crate::routes::build_router;
use crate::state::AppState;

#[instrument(level = "info", skip_all)]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  let config = AppConfig::load();
  let port = config.server.port;

  // Database, scenario store, cache, OpenAI client and JWT keys.
  let state = Arc::new(AppState::new(config).await?);

  let app = build_router(state.clone());

  let addr = SocketAddr::from(([0, 0, 0, 0], port));
  let listener = TcpListener::bind(addr).await?;
  info!(target: "tutor_backend", %addr, "HTTP server listening");
  axum::serve(listener, app).await?;
  Ok(())
}
