//! Database methods for user_budget_settings and budget_reset_logs

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult, Row};
use serde::Serialize;

use crate::budget::{calculate_period_end, BudgetPeriod, BudgetSettings};
use crate::config::BudgetConfig;
use crate::db::usage::sum_cost_since;
use crate::db::{parse_opt_ts, parse_ts, ts, Database};

#[derive(Debug, Clone, Serialize)]
pub struct BudgetResetLog {
    pub id: i64,
    pub user_id: String,
    pub reset_type: String,
    pub reset_by: String,
    pub previous_limit: f64,
    pub new_limit: f64,
    pub previous_spent: f64,
    pub previous_period_start: DateTime<Utc>,
    pub previous_period_end: Option<DateTime<Utc>>,
    pub new_period_start: DateTime<Utc>,
    pub new_period_end: Option<DateTime<Utc>>,
    pub reason: Option<String>,
    pub reset_timestamp: DateTime<Utc>,
}

const SETTINGS_COLUMNS: &str = "user_id, monthly_limit_usd, custom_limit_usd, budget_period, custom_period_days, \
     current_period_start, current_period_end, last_reset_date, enforce_budget, allow_budget_override, \
     auto_fallback_to_local, alert_threshold_yellow, alert_threshold_orange, alert_threshold_red, \
     budget_visible_to_user, user_can_modify_limit, user_can_reset_budget, admin_notes, configured_by, \
     created_at, updated_at";

fn row_to_settings(row: &Row<'_>) -> SqliteResult<BudgetSettings> {
    let period: String = row.get("budget_period")?;
    Ok(BudgetSettings {
        user_id: row.get("user_id")?,
        monthly_limit_usd: row.get("monthly_limit_usd")?,
        custom_limit_usd: row.get("custom_limit_usd")?,
        budget_period: BudgetPeriod::parse(&period).unwrap_or(BudgetPeriod::Monthly),
        custom_period_days: row.get("custom_period_days")?,
        current_period_start: parse_ts(5, row.get("current_period_start")?)?,
        current_period_end: parse_opt_ts(6, row.get("current_period_end")?)?,
        last_reset_date: parse_ts(7, row.get("last_reset_date")?)?,
        enforce_budget: row.get("enforce_budget")?,
        allow_budget_override: row.get("allow_budget_override")?,
        auto_fallback_to_local: row.get("auto_fallback_to_local")?,
        alert_threshold_yellow: row.get("alert_threshold_yellow")?,
        alert_threshold_orange: row.get("alert_threshold_orange")?,
        alert_threshold_red: row.get("alert_threshold_red")?,
        budget_visible_to_user: row.get("budget_visible_to_user")?,
        user_can_modify_limit: row.get("user_can_modify_limit")?,
        user_can_reset_budget: row.get("user_can_reset_budget")?,
        admin_notes: row.get("admin_notes")?,
        configured_by: row.get("configured_by")?,
        created_at: parse_ts(19, row.get("created_at")?)?,
        updated_at: parse_ts(20, row.get("updated_at")?)?,
    })
}

/// Who closes a budget period, and why.
#[derive(Debug, Clone)]
pub struct PeriodReset<'a> {
    pub user_pk: i64,
    pub user_id: &'a str,
    pub reset_by: &'a str,
    pub reason: String,
}

fn read_settings(conn: &Connection, user_id: &str) -> SqliteResult<Option<BudgetSettings>> {
    conn.query_row(
        &format!("SELECT {} FROM user_budget_settings WHERE user_id = ?1", SETTINGS_COLUMNS),
        [user_id],
        row_to_settings,
    )
    .optional()
}

fn write_settings(conn: &Connection, s: &BudgetSettings) -> SqliteResult<()> {
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO user_budget_settings ({})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)",
            SETTINGS_COLUMNS
        ),
        params![
            s.user_id,
            s.monthly_limit_usd,
            s.custom_limit_usd,
            s.budget_period.as_str(),
            s.custom_period_days,
            ts(&s.current_period_start),
            s.current_period_end.as_ref().map(ts),
            ts(&s.last_reset_date),
            s.enforce_budget,
            s.allow_budget_override,
            s.auto_fallback_to_local,
            s.alert_threshold_yellow,
            s.alert_threshold_orange,
            s.alert_threshold_red,
            s.budget_visible_to_user,
            s.user_can_modify_limit,
            s.user_can_reset_budget,
            s.admin_notes,
            s.configured_by,
            ts(&s.created_at),
            ts(&s.updated_at),
        ],
    )?;
    Ok(())
}

fn write_reset_log(conn: &Connection, log: &BudgetResetLog) -> SqliteResult<i64> {
    conn.execute(
        "INSERT INTO budget_reset_logs (user_id, reset_type, reset_by, previous_limit, new_limit,
            previous_spent, previous_period_start, previous_period_end, new_period_start,
            new_period_end, reason, reset_timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            log.user_id,
            log.reset_type,
            log.reset_by,
            log.previous_limit,
            log.new_limit,
            log.previous_spent,
            ts(&log.previous_period_start),
            log.previous_period_end.as_ref().map(ts),
            ts(&log.new_period_start),
            log.new_period_end.as_ref().map(ts),
            log.reason,
            ts(&log.reset_timestamp),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

impl Database {
    pub fn get_budget_settings(&self, user_id: &str) -> SqliteResult<Option<BudgetSettings>> {
        read_settings(&self.conn(), user_id)
    }

    /// Settings row for the user, created with configured defaults on first access.
    pub fn get_or_create_budget_settings(&self, user_id: &str, defaults: &BudgetConfig) -> SqliteResult<BudgetSettings> {
        if let Some(existing) = self.get_budget_settings(user_id)? {
            return Ok(existing);
        }
        let settings = BudgetSettings::new_default(user_id, defaults, Utc::now());
        self.save_budget_settings(&settings)?;
        Ok(settings)
    }

    /// Insert or overwrite the whole row.
    pub fn save_budget_settings(&self, s: &BudgetSettings) -> SqliteResult<()> {
        write_settings(&self.conn(), s)
    }

    pub fn list_budget_settings(&self) -> SqliteResult<Vec<BudgetSettings>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM user_budget_settings ORDER BY user_id",
            SETTINGS_COLUMNS
        ))?;
        let rows = stmt.query_map([], row_to_settings)?;
        rows.collect()
    }

    pub fn insert_reset_log(&self, log: &BudgetResetLog) -> SqliteResult<i64> {
        write_reset_log(&self.conn(), log)
    }

    /// Close the current period and open a new one starting at `now`.
    /// The spend sum, the settings update and the reset log commit together or not at all.
    pub fn reset_budget_period(
        &self,
        reset: &PeriodReset<'_>,
        defaults: &BudgetConfig,
        now: DateTime<Utc>,
    ) -> SqliteResult<(BudgetSettings, BudgetResetLog)> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let mut settings = match read_settings(&tx, reset.user_id)? {
            Some(s) => s,
            None => BudgetSettings::new_default(reset.user_id, defaults, now),
        };
        let previous_spent = sum_cost_since(&tx, reset.user_pk, settings.current_period_start)?;
        let new_end = calculate_period_end(settings.budget_period, settings.custom_period_days, now);

        let mut log = BudgetResetLog {
            id: 0,
            user_id: reset.user_id.to_string(),
            reset_type: "manual".into(),
            reset_by: reset.reset_by.to_string(),
            previous_limit: settings.effective_limit(),
            new_limit: settings.effective_limit(),
            previous_spent,
            previous_period_start: settings.current_period_start,
            previous_period_end: Some(settings.current_period_end.unwrap_or(now)),
            new_period_start: now,
            new_period_end: Some(new_end),
            reason: Some(reset.reason.clone()),
            reset_timestamp: now,
        };

        settings.current_period_start = now;
        settings.current_period_end = Some(new_end);
        settings.last_reset_date = now;
        settings.updated_at = now;
        write_settings(&tx, &settings)?;
        log.id = write_reset_log(&tx, &log)?;

        tx.commit()?;
        Ok((settings, log))
    }

    /// Newest first.
    pub fn list_reset_logs(&self, user_id: &str, limit: u32) -> SqliteResult<Vec<BudgetResetLog>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, reset_type, reset_by, previous_limit, new_limit, previous_spent,
                    previous_period_start, previous_period_end, new_period_start, new_period_end,
                    reason, reset_timestamp
             FROM budget_reset_logs WHERE user_id = ?1
             ORDER BY reset_timestamp DESC, id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![user_id, limit], |row| {
            Ok(BudgetResetLog {
                id: row.get(0)?,
                user_id: row.get(1)?,
                reset_type: row.get(2)?,
                reset_by: row.get(3)?,
                previous_limit: row.get(4)?,
                new_limit: row.get(5)?,
                previous_spent: row.get(6)?,
                previous_period_start: parse_ts(7, row.get(7)?)?,
                previous_period_end: parse_opt_ts(8, row.get(8)?)?,
                new_period_start: parse_ts(9, row.get(9)?)?,
                new_period_end: parse_opt_ts(10, row.get(10)?)?,
                reason: row.get(11)?,
                reset_timestamp: parse_ts(12, row.get(12)?)?,
            })
        })?;
        rows.collect()
    }
}
