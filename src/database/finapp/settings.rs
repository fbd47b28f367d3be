//! Key/value settings, per user or global (`user_id` NULL)

use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

use crate::database::core::{DatabaseError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Setting {
    pub setting_id: i64,
    pub user_id: Option<i64>,
    pub key: String,
    pub value: String,
}

pub struct SettingsRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SettingsRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Insert or overwrite a setting
    pub fn set(&self, user_id: Option<i64>, key: &str, value: &str) -> Result<()> {
        // `IS` instead of `=` so global (NULL user) settings match too
        let update = "UPDATE settings SET value = ?1 WHERE user_id IS ?2 AND key = ?3";
        let changed = self
            .conn
            .execute(update, (value, user_id, key))
            .map_err(|e| DatabaseError::sql(update, &[&value, &user_id, &key], e))?;
        if changed > 0 {
            return Ok(());
        }

        let insert = "INSERT INTO settings (user_id, key, value) VALUES (?1, ?2, ?3)";
        self.conn
            .execute(insert, (user_id, key, value))
            .map_err(|e| DatabaseError::sql(insert, &[&user_id, &key, &value], e))?;
        Ok(())
    }

    pub fn get(&self, user_id: Option<i64>, key: &str) -> Result<Option<String>> {
        let sql = "SELECT value FROM settings WHERE user_id IS ?1 AND key = ?2 LIMIT 1";
        self.conn
            .query_row(sql, (user_id, key), |row| row.get(0))
            .optional()
            .map_err(|e| DatabaseError::sql(sql, &[&user_id, &key], e))
    }

    pub fn list_for_user(&self, user_id: Option<i64>) -> Result<Vec<Setting>> {
        let sql = "SELECT setting_id, user_id, key, value FROM settings \
             WHERE user_id IS ?1 ORDER BY key";
        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|e| DatabaseError::sql(sql, &[&user_id], e))?;
        let settings = stmt
            .query_map([user_id], |row| {
                Ok(Setting {
                    setting_id: row.get(0)?,
                    user_id: row.get(1)?,
                    key: row.get(2)?,
                    value: row.get(3)?,
                })
            })
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(|e| DatabaseError::sql(sql, &[&user_id], e))?;
        Ok(settings)
    }

    pub fn delete(&self, user_id: Option<i64>, key: &str) -> Result<bool> {
        let sql = "DELETE FROM settings WHERE user_id IS ?1 AND key = ?2";
        let deleted = self
            .conn
            .execute(sql, (user_id, key))
            .map_err(|e| DatabaseError::sql(sql, &[&user_id, &key], e))?;
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::finapp::testing::{insert_user, setup_test_db};

    #[test]
    fn test_set_overwrites() {
        let db = setup_test_db();
        let user_id = insert_user(&db, "a@example.com");
        let repo = SettingsRepository::new(&db.conn);

        repo.set(Some(user_id), "currency", "USD").unwrap();
        repo.set(Some(user_id), "currency", "EUR").unwrap();

        assert_eq!(
            repo.get(Some(user_id), "currency").unwrap().as_deref(),
            Some("EUR")
        );
        assert_eq!(repo.list_for_user(Some(user_id)).unwrap().len(), 1);
    }

    #[test]
    fn test_global_settings_are_separate_and_unique() {
        let db = setup_test_db();
        let user_id = insert_user(&db, "a@example.com");
        let repo = SettingsRepository::new(&db.conn);

        repo.set(None, "theme", "dark").unwrap();
        repo.set(None, "theme", "light").unwrap();
        repo.set(Some(user_id), "theme", "solarized").unwrap();

        assert_eq!(repo.get(None, "theme").unwrap().as_deref(), Some("light"));
        assert_eq!(repo.list_for_user(None).unwrap().len(), 1);
        assert_eq!(
            repo.get(Some(user_id), "theme").unwrap().as_deref(),
            Some("solarized")
        );
    }

    #[test]
    fn test_delete() {
        let db = setup_test_db();
        let repo = SettingsRepository::new(&db.conn);

        repo.set(None, "theme", "dark").unwrap();
        assert!(repo.delete(None, "theme").unwrap());
        assert!(!repo.delete(None, "theme").unwrap());
        assert!(repo.get(None, "theme").unwrap().is_none());
    }
}
