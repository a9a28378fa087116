//! SQLite persistence for users, API usage and budget state.
//!
//! Table groups extend `Database` from their own modules.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{types::Type, Connection, Result as SqliteResult};
use tracing::info;

pub mod budget;
pub mod usage;
pub mod users;

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn new(database_path: &str) -> SqliteResult<Self> {
        if let Some(parent) = Path::new(database_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).ok();
            }
        }
        let conn = Connection::open(database_path)?;
        let db = Self { conn: Mutex::new(conn) };
        db.init()?;
        info!(target: "tutor_backend", path = %database_path, "SQLite database ready");
        Ok(db)
    }

    /// Fresh private database.
    #[cfg(test)]
    pub fn in_memory() -> SqliteResult<Self> {
        let db = Self { conn: Mutex::new(Connection::open_in_memory()?) };
        db.init()?;
        Ok(db)
    }

    /// A poisoned lock still holds a usable connection.
    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn init(&self) -> SqliteResult<()> {
        let conn = self.conn();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT UNIQUE NOT NULL,
                username TEXT NOT NULL,
                email TEXT,
                password_hash TEXT,
                role TEXT NOT NULL DEFAULT 'child',
                first_name TEXT,
                last_name TEXT,
                ui_language TEXT NOT NULL DEFAULT 'en',
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                last_login TEXT
            )",
            [],
        )?;

        // Append-only ledger of paid provider calls
        conn.execute(
            "CREATE TABLE IF NOT EXISTS api_usage (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER,
                api_provider TEXT NOT NULL,
                api_endpoint TEXT NOT NULL,
                request_type TEXT NOT NULL,
                tokens_used INTEGER NOT NULL DEFAULT 0,
                estimated_cost REAL NOT NULL DEFAULT 0,
                actual_cost REAL,
                status TEXT NOT NULL DEFAULT 'success',
                created_at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_api_usage_user_time ON api_usage(user_id, created_at)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS user_budget_settings (
                user_id TEXT PRIMARY KEY,
                monthly_limit_usd REAL NOT NULL,
                custom_limit_usd REAL,
                budget_period TEXT NOT NULL DEFAULT 'monthly',
                custom_period_days INTEGER,
                current_period_start TEXT NOT NULL,
                current_period_end TEXT,
                last_reset_date TEXT NOT NULL,
                enforce_budget INTEGER NOT NULL DEFAULT 1,
                allow_budget_override INTEGER NOT NULL DEFAULT 1,
                auto_fallback_to_local INTEGER NOT NULL DEFAULT 0,
                alert_threshold_yellow REAL NOT NULL,
                alert_threshold_orange REAL NOT NULL,
                alert_threshold_red REAL NOT NULL,
                budget_visible_to_user INTEGER NOT NULL DEFAULT 1,
                user_can_modify_limit INTEGER NOT NULL DEFAULT 0,
                user_can_reset_budget INTEGER NOT NULL DEFAULT 0,
                admin_notes TEXT,
                configured_by TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS budget_reset_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                reset_type TEXT NOT NULL,
                reset_by TEXT NOT NULL,
                previous_limit REAL NOT NULL,
                new_limit REAL NOT NULL,
                previous_spent REAL NOT NULL,
                previous_period_start TEXT NOT NULL,
                previous_period_end TEXT,
                new_period_start TEXT NOT NULL,
                new_period_end TEXT,
                reason TEXT,
                reset_timestamp TEXT NOT NULL
            )",
            [],
        )?;

        Ok(())
    }
}

/// The statement was rejected by a UNIQUE, NOT NULL or CHECK constraint.
pub(crate) fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(f, _) if f.code == rusqlite::ErrorCode::ConstraintViolation)
}

/// RFC 3339 UTC with fixed precision, so that TEXT ordering is time ordering.
pub(crate) fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(idx: usize, raw: String) -> SqliteResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn parse_opt_ts(idx: usize, raw: Option<String>) -> SqliteResult<Option<DateTime<Utc>>> {
    raw.map(|s| parse_ts(idx, s)).transpose()
}
