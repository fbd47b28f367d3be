//! Error types for database operations
//!
//! Every failure keeps the message of the engine error it wraps.

use std::sync::Arc;
use std::time::Duration;

use rusqlite::ErrorCode;
use thiserror::Error;

/// Result alias used throughout the database layer
pub type Result<T> = std::result::Result<T, DatabaseError>;

/// Error shared between every caller attached to one in-flight operation
pub type SharedError = Arc<DatabaseError>;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("database is not open, call open() first")]
    NotOpen,

    #[error("database tables are not initialized, call open() first")]
    SchemaNotInitialized,

    #[error("SQL error executing `{statement}` with params {params:?}: {source}")]
    Sql {
        statement: String,
        params: Vec<String>,
        #[source]
        source: rusqlite::Error,
    },

    #[error("database is missing tables: {}", .0.join(", "))]
    MissingTables(Vec<String>),

    #[error("failed to open database after {attempts} attempts: {source}")]
    OpenFailed {
        attempts: u32,
        #[source]
        source: Box<DatabaseError>,
    },

    #[error("database initialization failed after {attempts} attempts: {reason}")]
    InitFailed { attempts: u32, reason: String },

    #[error("database initialization did not finish within {0:?}")]
    Timeout(Duration),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("database file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database handle lock poisoned")]
    LockPoisoned,
}

impl DatabaseError {
    /// Wrap an engine error together with the statement that produced it
    pub fn sql(statement: &str, params: &[&dyn rusqlite::ToSql], source: rusqlite::Error) -> Self {
        DatabaseError::Sql {
            statement: statement.trim().to_string(),
            params: params
                .iter()
                .map(|p| match p.to_sql() {
                    Ok(value) => format!("{:?}", value),
                    Err(_) => "<unrenderable>".to_string(),
                })
                .collect(),
            source,
        }
    }

    /// Whether the error says the file on disk is not a usable database
    ///
    /// Only these errors justify deleting the file under
    /// [`RecoveryMode::OnCorruption`](crate::database::RecoveryMode).
    pub fn is_corruption(&self) -> bool {
        match self {
            DatabaseError::Sql { source, .. } => is_corrupt_engine_error(source),
            DatabaseError::OpenFailed { source, .. } => source.is_corruption(),
            DatabaseError::InitFailed { reason, .. } => is_corruption_message(reason),
            _ => false,
        }
    }

    /// Whether this error means the handle simply is not ready yet
    pub fn is_not_ready(&self) -> bool {
        matches!(
            self,
            DatabaseError::NotOpen | DatabaseError::SchemaNotInitialized
        )
    }
}

fn is_corrupt_engine_error(err: &rusqlite::Error) -> bool {
    match err.sqlite_error_code() {
        Some(ErrorCode::DatabaseCorrupt) | Some(ErrorCode::NotADatabase) => true,
        _ => is_corruption_message(&err.to_string()),
    }
}

fn is_corruption_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("database disk image is malformed")
        || lower.contains("malformed database schema")
        || lower.contains("file is not a database")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_tables_message_names_every_table() {
        let err = DatabaseError::MissingTables(vec!["todos".to_string(), "budgets".to_string()]);
        assert_eq!(err.to_string(), "database is missing tables: todos, budgets");
    }

    #[test]
    fn test_sql_error_keeps_statement_and_params() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let source = conn
            .execute("INSERT INTO nowhere VALUES (?1)", [1])
            .unwrap_err();
        let err = DatabaseError::sql("INSERT INTO nowhere VALUES (?1)", &[&1], source);

        let message = err.to_string();
        assert!(message.contains("INSERT INTO nowhere"));
        assert!(message.contains("no such table"));
        match err {
            DatabaseError::Sql { params, .. } => assert_eq!(params.len(), 1),
            other => panic!("unexpected error: {other}"),
        }
    }

    fn engine_failure(code: std::os::raw::c_int) -> DatabaseError {
        DatabaseError::sql(
            "open",
            &[],
            rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(code), None),
        )
    }

    #[test]
    fn test_corruption_detection() {
        let err = DatabaseError::OpenFailed {
            attempts: 5,
            source: Box::new(engine_failure(rusqlite::ffi::SQLITE_NOTADB)),
        };
        assert!(err.is_corruption());

        let err = DatabaseError::OpenFailed {
            attempts: 5,
            source: Box::new(engine_failure(rusqlite::ffi::SQLITE_CANTOPEN)),
        };
        assert!(!err.is_corruption());
        assert!(!DatabaseError::NotOpen.is_corruption());

        let err = DatabaseError::InitFailed {
            attempts: 3,
            reason: "database disk image is malformed".to_string(),
        };
        assert!(err.is_corruption());
    }

    #[test]
    fn test_not_ready_kinds() {
        assert!(DatabaseError::NotOpen.is_not_ready());
        assert!(DatabaseError::SchemaNotInitialized.is_not_ready());
        assert!(!DatabaseError::LockPoisoned.is_not_ready());
    }
}
