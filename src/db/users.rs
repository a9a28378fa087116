//! Database methods for the users table

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Result as SqliteResult, Row};

use crate::db::{parse_opt_ts, parse_ts, ts, Database};
use crate::domain::{User, UserRole};

/// Fields accepted at registration.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub user_id: String,
    pub username: String,
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub role: UserRole,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// Partial profile update; `None` keeps the stored value.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub username: Option<String>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub ui_language: Option<String>,
}

const USER_COLUMNS: &str = "id, user_id, username, email, password_hash, role, first_name, last_name, \
     ui_language, is_active, created_at, updated_at, last_login";

fn row_to_user(row: &Row<'_>) -> SqliteResult<User> {
    let role: String = row.get("role")?;
    Ok(User {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        username: row.get("username")?,
        email: row.get("email")?,
        password_hash: row.get("password_hash")?,
        role: UserRole::parse(&role).unwrap_or(UserRole::Child),
        first_name: row.get("first_name")?,
        last_name: row.get("last_name")?,
        ui_language: row.get("ui_language")?,
        is_active: row.get("is_active")?,
        created_at: parse_ts(10, row.get("created_at")?)?,
        updated_at: parse_ts(11, row.get("updated_at")?)?,
        last_login: parse_opt_ts(12, row.get("last_login")?)?,
    })
}

impl Database {
    pub fn create_user(&self, new: &NewUser) -> SqliteResult<User> {
        let now = ts(&Utc::now());
        {
            let conn = self.conn();
            conn.execute(
                "INSERT INTO users (user_id, username, email, password_hash, role, first_name, last_name,
                                    ui_language, is_active, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'en', 1, ?8, ?8)",
                params![
                    new.user_id,
                    new.username,
                    new.email,
                    new.password_hash,
                    new.role.as_str(),
                    new.first_name,
                    new.last_name,
                    now,
                ],
            )?;
        }
        self.get_user(&new.user_id)?
            .ok_or(rusqlite::Error::QueryReturnedNoRows)
    }

    pub fn get_user(&self, user_id: &str) -> SqliteResult<Option<User>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {} FROM users WHERE user_id = ?1", USER_COLUMNS),
            [user_id],
            row_to_user,
        )
        .optional()
    }

    pub fn list_active_users(&self) -> SqliteResult<Vec<User>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM users WHERE is_active = 1 ORDER BY id",
            USER_COLUMNS
        ))?;
        let rows = stmt.query_map([], row_to_user)?;
        rows.collect()
    }

    pub fn admin_exists(&self) -> SqliteResult<bool> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM users WHERE role = 'admin'",
            [],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn touch_last_login(&self, user_id: &str) -> SqliteResult<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE users SET last_login = ?1 WHERE user_id = ?2",
            params![ts(&Utc::now()), user_id],
        )?;
        Ok(())
    }

    /// Returns false when the user does not exist.
    pub fn update_user_profile(&self, user_id: &str, update: &ProfileUpdate) -> SqliteResult<bool> {
        let conn = self.conn();
        let affected = conn.execute(
            "UPDATE users SET
                username = COALESCE(?1, username),
                email = COALESCE(?2, email),
                first_name = COALESCE(?3, first_name),
                last_name = COALESCE(?4, last_name),
                ui_language = COALESCE(?5, ui_language),
                updated_at = ?6
             WHERE user_id = ?7",
            params![
                update.username,
                update.email,
                update.first_name,
                update.last_name,
                update.ui_language,
                ts(&Utc::now()),
                user_id,
            ],
        )?;
        Ok(affected > 0)
    }
}
