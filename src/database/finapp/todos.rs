//! Todo repository

use chrono::{NaiveDate, NaiveTime};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{map_insert_error, SqlDate, SqlTime};
use crate::database::core::{DatabaseError, Result};

const TODO_COLUMNS: &str = "todo_id, user_id, title, description, completed, \
     has_reminder, reminder_date, reminder_time, created_at";

/// When to remind the user about a todo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reminder {
    pub date: NaiveDate,
    pub time: NaiveTime,
}

/// Fields supplied when creating a todo
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewTodo {
    pub title: String,
    pub description: Option<String>,
    pub reminder: Option<Reminder>,
    pub completed: bool,
}

impl NewTodo {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }
}

/// A stored todo item
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Todo {
    pub todo_id: i64,
    pub user_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub completed: bool,
    pub reminder: Option<Reminder>,
    pub created_at: String,
}

impl Todo {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let has_reminder: bool = row.get(5)?;
        let date: Option<SqlDate> = row.get(6)?;
        let time: Option<SqlTime> = row.get(7)?;
        let reminder = match (has_reminder, date, time) {
            (true, Some(date), Some(time)) => Some(Reminder {
                date: date.0,
                time: time.0,
            }),
            _ => None,
        };

        Ok(Todo {
            todo_id: row.get(0)?,
            user_id: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            completed: row.get(4)?,
            reminder,
            created_at: row.get(8)?,
        })
    }
}

/// Repository for a user's todo list
pub struct TodoRepository<'a> {
    conn: &'a Connection,
}

impl<'a> TodoRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Insert a todo; titles are unique per user
    pub fn create(&self, user_id: i64, todo: &NewTodo) -> Result<Todo> {
        let sql = "INSERT INTO todos \
             (user_id, title, description, completed, has_reminder, reminder_date, reminder_time) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)";
        let date = todo.reminder.map(|r| SqlDate(r.date));
        let time = todo.reminder.map(|r| SqlTime(r.time));
        let has_reminder = todo.reminder.is_some();

        self.conn
            .execute(
                sql,
                (
                    user_id,
                    &todo.title,
                    &todo.description,
                    todo.completed,
                    has_reminder,
                    date,
                    time,
                ),
            )
            .map_err(|e| {
                map_insert_error(
                    || format!("todo '{}'", todo.title),
                    sql,
                    &[&user_id, &todo.title, &todo.description],
                    e,
                )
            })?;

        let todo_id = self.conn.last_insert_rowid();
        info!("Todo created: {}, ID: {}", todo.title, todo_id);
        self.find_by_id(todo_id)?
            .ok_or_else(|| DatabaseError::sql(sql, &[], rusqlite::Error::QueryReturnedNoRows))
    }

    pub fn find_by_id(&self, todo_id: i64) -> Result<Option<Todo>> {
        let sql = format!("SELECT {TODO_COLUMNS} FROM todos WHERE todo_id = ?1 LIMIT 1");
        self.conn
            .query_row(&sql, [todo_id], Todo::from_row)
            .optional()
            .map_err(|e| DatabaseError::sql(&sql, &[&todo_id], e))
    }

    /// Open items first, then oldest first
    pub fn list_for_user(&self, user_id: i64) -> Result<Vec<Todo>> {
        let sql = format!(
            "SELECT {TODO_COLUMNS} FROM todos WHERE user_id = ?1 \
             ORDER BY completed, created_at, todo_id"
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|e| DatabaseError::sql(&sql, &[&user_id], e))?;
        let todos = stmt
            .query_map([user_id], Todo::from_row)
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(|e| DatabaseError::sql(&sql, &[&user_id], e))?;
        Ok(todos)
    }

    pub fn set_completed(&self, todo_id: i64, completed: bool) -> Result<bool> {
        let sql = "UPDATE todos SET completed = ?1 WHERE todo_id = ?2";
        let changed = self
            .conn
            .execute(sql, (completed, todo_id))
            .map_err(|e| DatabaseError::sql(sql, &[&completed, &todo_id], e))?;
        Ok(changed > 0)
    }

    /// Set or clear the reminder
    pub fn update_reminder(&self, todo_id: i64, reminder: Option<Reminder>) -> Result<bool> {
        let sql = "UPDATE todos SET has_reminder = ?1, reminder_date = ?2, reminder_time = ?3 \
             WHERE todo_id = ?4";
        let changed = self
            .conn
            .execute(
                sql,
                (
                    reminder.is_some(),
                    reminder.map(|r| SqlDate(r.date)),
                    reminder.map(|r| SqlTime(r.time)),
                    todo_id,
                ),
            )
            .map_err(|e| DatabaseError::sql(sql, &[&todo_id], e))?;
        Ok(changed > 0)
    }

    pub fn delete(&self, todo_id: i64) -> Result<bool> {
        let sql = "DELETE FROM todos WHERE todo_id = ?1";
        let deleted = self
            .conn
            .execute(sql, [todo_id])
            .map_err(|e| DatabaseError::sql(sql, &[&todo_id], e))?;
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::finapp::testing::{insert_user, setup_test_db};

    fn reminder() -> Reminder {
        Reminder {
            date: NaiveDate::from_ymd_opt(2026, 3, 14).unwrap(),
            time: NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
        }
    }

    #[test]
    fn test_create_with_reminder() {
        let db = setup_test_db();
        let user_id = insert_user(&db, "a@example.com");
        let repo = TodoRepository::new(&db.conn);

        let todo = repo
            .create(
                user_id,
                &NewTodo {
                    title: "Pay rent".to_string(),
                    description: Some("before the 1st".to_string()),
                    reminder: Some(reminder()),
                    completed: false,
                },
            )
            .unwrap();

        assert_eq!(todo.user_id, user_id);
        assert_eq!(todo.reminder, Some(reminder()));
        assert_eq!(repo.find_by_id(todo.todo_id).unwrap(), Some(todo));
    }

    #[test]
    fn test_duplicate_title_per_user() {
        let db = setup_test_db();
        let alice = insert_user(&db, "alice@example.com");
        let bob = insert_user(&db, "bob@example.com");
        let repo = TodoRepository::new(&db.conn);

        repo.create(alice, &NewTodo::titled("Groceries")).unwrap();
        let err = repo.create(alice, &NewTodo::titled("Groceries")).unwrap_err();
        assert!(matches!(err, DatabaseError::AlreadyExists(_)));

        // Same title for another user is fine
        repo.create(bob, &NewTodo::titled("Groceries")).unwrap();
    }

    #[test]
    fn test_list_orders_open_items_first() {
        let db = setup_test_db();
        let user_id = insert_user(&db, "a@example.com");
        let repo = TodoRepository::new(&db.conn);

        let first = repo.create(user_id, &NewTodo::titled("first")).unwrap();
        let second = repo.create(user_id, &NewTodo::titled("second")).unwrap();
        assert!(repo.set_completed(first.todo_id, true).unwrap());

        let titles: Vec<_> = repo
            .list_for_user(user_id)
            .unwrap()
            .into_iter()
            .map(|t| t.title)
            .collect();
        assert_eq!(titles, vec!["second", "first"]);
        assert!(!repo.find_by_id(second.todo_id).unwrap().unwrap().completed);
    }

    #[test]
    fn test_update_reminder_and_delete() {
        let db = setup_test_db();
        let user_id = insert_user(&db, "a@example.com");
        let repo = TodoRepository::new(&db.conn);
        let todo = repo.create(user_id, &NewTodo::titled("call mom")).unwrap();

        assert!(repo.update_reminder(todo.todo_id, Some(reminder())).unwrap());
        assert_eq!(
            repo.find_by_id(todo.todo_id).unwrap().unwrap().reminder,
            Some(reminder())
        );
        assert!(repo.update_reminder(todo.todo_id, None).unwrap());
        assert!(repo
            .find_by_id(todo.todo_id)
            .unwrap()
            .unwrap()
            .reminder
            .is_none());

        assert!(repo.delete(todo.todo_id).unwrap());
        assert!(repo.find_by_id(todo.todo_id).unwrap().is_none());
        assert!(!repo.set_completed(todo.todo_id, true).unwrap());
    }
}
