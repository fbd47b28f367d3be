//! Finapp data access
//!
//! Repositories borrow a connection obtained through
//! [`DbHandle::with_conn`](crate::database::DbHandle::with_conn) and never
//! open or close the handle themselves.

mod accounts;
mod budgets;
mod settings;
mod todos;
mod transactions;
mod users;

pub use accounts::{Account, AccountRepository, AccountType, NewAccount};
pub use budgets::{Budget, BudgetPeriod, BudgetRepository, NewBudget};
pub use settings::{Setting, SettingsRepository};
pub use todos::{NewTodo, Reminder, Todo, TodoRepository};
pub use transactions::{
    CategoryTotal, NewTransaction, Transaction, TransactionRepository, TransactionType,
    UNCATEGORIZED,
};
pub use users::{User, UserRepository};

use chrono::{NaiveDate, NaiveTime};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{ffi, ToSql};

use crate::database::core::DatabaseError;

/// Date format used for every date column
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Time-of-day format used for reminder times
pub const TIME_FORMAT: &str = "%H:%M";

/// Map an insert error to `AlreadyExists` when it hit a UNIQUE constraint
fn map_insert_error(
    what: impl FnOnce() -> String,
    statement: &str,
    params: &[&dyn ToSql],
    err: rusqlite::Error,
) -> DatabaseError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            DatabaseError::AlreadyExists(what())
        }
        _ => DatabaseError::sql(statement, params, err),
    }
}

/// `NaiveDate` stored as `YYYY-MM-DD` text
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct SqlDate(NaiveDate);

impl ToSql for SqlDate {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0.format(DATE_FORMAT).to_string()))
    }
}

impl FromSql for SqlDate {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        NaiveDate::parse_from_str(text, DATE_FORMAT)
            .map(SqlDate)
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

/// `NaiveTime` stored as `HH:MM` text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SqlTime(NaiveTime);

impl ToSql for SqlTime {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0.format(TIME_FORMAT).to_string()))
    }
}

impl FromSql for SqlTime {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        NaiveTime::parse_from_str(text, TIME_FORMAT)
            .map(SqlTime)
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}
