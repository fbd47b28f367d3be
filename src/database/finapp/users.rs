//! User repository

use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use tracing::info;

use super::map_insert_error;
use crate::database::core::{DatabaseError, Result};

const USER_COLUMNS: &str = "user_id, full_name, email, password_hash, created_at";

/// A registered user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub user_id: i64,
    pub full_name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: String,
}

impl User {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(User {
            user_id: row.get(0)?,
            full_name: row.get(1)?,
            email: row.get(2)?,
            password_hash: row.get(3)?,
            created_at: row.get(4)?,
        })
    }
}

/// Repository for user records
pub struct UserRepository<'a> {
    conn: &'a Connection,
}

impl<'a> UserRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Insert a user and return the stored record
    ///
    /// Emails are unique; a duplicate yields [`DatabaseError::AlreadyExists`].
    pub fn create(&self, full_name: &str, email: &str, password_hash: &str) -> Result<User> {
        let sql = "INSERT INTO users (full_name, email, password_hash) VALUES (?1, ?2, ?3)";
        self.conn
            .execute(sql, (full_name, email, password_hash))
            .map_err(|e| {
                map_insert_error(
                    || format!("email {}", email),
                    sql,
                    &[&full_name, &email, &"<redacted>"],
                    e,
                )
            })?;

        let user_id = self.conn.last_insert_rowid();
        info!("User created: {}, ID: {}", email, user_id);
        self.find_by_id(user_id)?
            .ok_or_else(|| DatabaseError::sql(sql, &[], rusqlite::Error::QueryReturnedNoRows))
    }

    pub fn find_by_id(&self, user_id: i64) -> Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE user_id = ?1 LIMIT 1");
        self.conn
            .query_row(&sql, [user_id], User::from_row)
            .optional()
            .map_err(|e| DatabaseError::sql(&sql, &[&user_id], e))
    }

    pub fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1 LIMIT 1");
        self.conn
            .query_row(&sql, [email], User::from_row)
            .optional()
            .map_err(|e| DatabaseError::sql(&sql, &[&email], e))
    }

    /// Returns `false` when no such user exists
    pub fn update_password_hash(&self, user_id: i64, password_hash: &str) -> Result<bool> {
        let sql = "UPDATE users SET password_hash = ?1 WHERE user_id = ?2";
        let changed = self
            .conn
            .execute(sql, (password_hash, user_id))
            .map_err(|e| DatabaseError::sql(sql, &[&"<redacted>", &user_id], e))?;
        Ok(changed > 0)
    }

    /// Delete a user together with everything they own
    pub fn delete(&self, user_id: i64) -> Result<bool> {
        let sql = "DELETE FROM users WHERE user_id = ?1";
        let deleted = self
            .conn
            .execute(sql, [user_id])
            .map_err(|e| DatabaseError::sql(sql, &[&user_id], e))?;
        if deleted > 0 {
            info!("User {} deleted", user_id);
        }
        Ok(deleted > 0)
    }

    pub fn count(&self) -> Result<u64> {
        let sql = "SELECT COUNT(*) FROM users";
        self.conn
            .query_row(sql, [], |row| row.get(0))
            .map_err(|e| DatabaseError::sql(sql, &[], e))
    }
}
