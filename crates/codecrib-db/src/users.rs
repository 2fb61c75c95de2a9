use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, Row};

use crate::Database;
use crate::models::UserRow;

const USER_COLUMNS: &str =
    "id, name, email, password, profile_pic, reset_token, reset_token_expiry, created_at";

impl Database {
    // -- Users --

    /// Emails are stored lower-cased so lookups are case-insensitive.
    /// Returns false when the email (or id) is already taken.
    pub fn create_user(&self, id: &str, name: &str, email: &str, password_hash: &str) -> Result<bool> {
        self.with_conn(|conn| {
            match conn.execute(
                "INSERT INTO users (id, name, email, password) VALUES (?1, ?2, ?3, ?4)",
                (id, name, email.trim().to_lowercase(), password_hash),
            ) {
                Ok(_) => Ok(true),
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    Ok(false)
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        let email = email.trim().to_lowercase();
        self.with_conn(|conn| query_user(conn, "email", &email))
    }

    /// Batch-fetch users for a set of ids. Unknown ids are skipped.
    pub fn get_users_by_ids(&self, ids: &[String]) -> Result<Vec<UserRow>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT {} FROM users WHERE id IN ({})",
                USER_COLUMNS,
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(ids.iter()), map_user)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Returns false when the user does not exist.
    pub fn set_profile_pic(&self, id: &str, profile_pic: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET profile_pic = ?2 WHERE id = ?1",
                (id, profile_pic),
            )?;
            Ok(changed > 0)
        })
    }

    /// Stores a reset token and its expiry (unix seconds) for the account
    /// with this email. Returns false when no such account exists.
    pub fn set_reset_token(&self, email: &str, token: &str, expires_at: i64) -> Result<bool> {
        let email = email.trim().to_lowercase();
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET reset_token = ?2, reset_token_expiry = ?3 WHERE email = ?1",
                rusqlite::params![email, token, expires_at],
            )?;
            Ok(changed > 0)
        })
    }

    /// Replaces the password of the account holding an unexpired `token` and
    /// clears the token pair. Returns false for unknown or expired tokens.
    pub fn reset_password(&self, token: &str, now: i64, password_hash: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users
                 SET password = ?3, reset_token = NULL, reset_token_expiry = NULL
                 WHERE reset_token = ?1 AND reset_token_expiry > ?2",
                rusqlite::params![token, now, password_hash],
            )?;
            Ok(changed > 0)
        })
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let sql = format!("SELECT {} FROM users WHERE {} = ?1", USER_COLUMNS, column);
    let row = conn.query_row(&sql, [value], map_user).optional()?;
    Ok(row)
}

fn map_user(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        password: row.get(3)?,
        profile_pic: row.get(4)?,
        reset_token: row.get(5)?,
        reset_token_expiry: row.get(6)?,
        created_at: row.get(7)?,
    })
}
