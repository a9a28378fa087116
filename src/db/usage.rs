//! Database methods for the api_usage ledger

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Result as SqliteResult};
use serde::Serialize;

use crate::db::{parse_ts, ts, Database};

#[derive(Debug, Clone, Serialize)]
pub struct ApiUsage {
    pub id: i64,
    pub user_id: Option<i64>,
    pub api_provider: String,
    pub api_endpoint: String,
    pub request_type: String,
    pub tokens_used: i64,
    pub estimated_cost: f64,
    pub actual_cost: Option<f64>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUsage<'a> {
    pub user_id: Option<i64>,
    pub api_provider: &'a str,
    pub api_endpoint: &'a str,
    pub request_type: &'a str,
    pub tokens_used: i64,
    pub estimated_cost: f64,
    pub status: &'a str,
}

pub(crate) fn sum_cost_since(conn: &Connection, user_pk: i64, since: DateTime<Utc>) -> SqliteResult<f64> {
    conn.query_row(
        "SELECT COALESCE(SUM(estimated_cost), 0.0) FROM api_usage
         WHERE user_id = ?1 AND created_at >= ?2",
        params![user_pk, ts(&since)],
        |row| row.get(0),
    )
}

impl Database {
    pub fn record_usage(&self, usage: &NewUsage<'_>, at: DateTime<Utc>) -> SqliteResult<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO api_usage (user_id, api_provider, api_endpoint, request_type, tokens_used,
                                    estimated_cost, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                usage.user_id,
                usage.api_provider,
                usage.api_endpoint,
                usage.request_type,
                usage.tokens_used,
                usage.estimated_cost,
                usage.status,
                ts(&at),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Sum of estimated cost for a user since `since` (inclusive).
    pub fn sum_cost_since(&self, user_pk: i64, since: DateTime<Utc>) -> SqliteResult<f64> {
        sum_cost_since(&self.conn(), user_pk, since)
    }

    pub fn list_usage_since(&self, user_pk: i64, since: DateTime<Utc>) -> SqliteResult<Vec<ApiUsage>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, api_provider, api_endpoint, request_type, tokens_used, estimated_cost,
                    actual_cost, status, created_at
             FROM api_usage WHERE user_id = ?1 AND created_at >= ?2
             ORDER BY created_at",
        )?;
        let rows = stmt.query_map(params![user_pk, ts(&since)], |row| {
            Ok(ApiUsage {
                id: row.get(0)?,
                user_id: row.get(1)?,
                api_provider: row.get(2)?,
                api_endpoint: row.get(3)?,
                request_type: row.get(4)?,
                tokens_used: row.get(5)?,
                estimated_cost: row.get(6)?,
                actual_cost: row.get(7)?,
                status: row.get(8)?,
                created_at: parse_ts(9, row.get(9)?)?,
            })
        })?;
        rows.collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn usage(user: i64, cost: f64) -> NewUsage<'static> {
        NewUsage {
            user_id: Some(user),
            api_provider: "openai",
            api_endpoint: "chat/completions",
            request_type: "llm",
            tokens_used: 100,
            estimated_cost: cost,
            status: "success",
        }
    }

    #[test]
    fn sums_only_the_window_and_the_user() {
        let db = Database::in_memory().unwrap();
        let now = Utc::now();
        db.record_usage(&usage(1, 0.5), now - Duration::days(40)).unwrap();
        db.record_usage(&usage(1, 1.25), now - Duration::days(1)).unwrap();
        db.record_usage(&usage(1, 0.25), now).unwrap();
        db.record_usage(&usage(2, 9.0), now).unwrap();

        let since = now - Duration::days(30);
        assert!((db.sum_cost_since(1, since).unwrap() - 1.5).abs() < 1e-9);
        assert_eq!(db.list_usage_since(1, since).unwrap().len(), 2);
        assert_eq!(db.sum_cost_since(3, since).unwrap(), 0.0);
    }
}
