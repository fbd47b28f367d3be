//! Database connection management
//!
//! This module provides the core database connection wrapper used throughout finapp.

use rusqlite::Connection;

use super::error::{DatabaseError, Result};

/// SQL listing user tables, skipping SQLite and Android bookkeeping tables
const LIST_TABLES_SQL: &str = "SELECT name FROM sqlite_master \
     WHERE type='table' AND name NOT LIKE 'sqlite_%' AND name NOT LIKE 'android_%' \
     ORDER BY name";

/// Core database connection wrapper
///
/// `DatabaseConn` provides a thin wrapper around SQLite connections,
/// handling both file-based and in-memory databases with consistent
/// configuration and error handling.
pub struct DatabaseConn {
    pub conn: Connection,
}

impl DatabaseConn {
    /// Open a database at the specified path
    ///
    /// If the path is `None`, an in-memory database is created.
    pub fn open(path: Option<&str>) -> Result<Self> {
        let conn = match path {
            Some(p) => Connection::open(p),
            None => Connection::open_in_memory(),
        }
        .map_err(|e| DatabaseError::sql("open", &[], e))?;

        Self::from_connection(conn)
    }

    /// Wrap an already opened connection and apply finapp's settings
    pub fn from_connection(conn: Connection) -> Result<Self> {
        let db = DatabaseConn { conn };
        db.configure()?;
        Ok(db)
    }

    /// Create an in-memory database
    pub fn open_in_memory() -> Result<Self> {
        Self::open(None)
    }

    /// Configure the connection
    fn configure(&self) -> Result<()> {
        // WAL keeps readers unblocked while the app writes; in-memory databases answer "memory"
        let _: String = self
            .conn
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))
            .map_err(|e| DatabaseError::sql("PRAGMA journal_mode=WAL", &[], e))?;

        self.execute("PRAGMA synchronous=NORMAL")?;

        // Cascading deletes on users depend on this
        self.execute("PRAGMA foreign_keys=ON")?;

        Ok(())
    }

    /// Execute a SQL statement
    pub fn execute(&self, sql: &str) -> Result<usize> {
        self.conn
            .execute(sql, [])
            .map_err(|e| DatabaseError::sql(sql, &[], e))
    }

    /// Get the row count for a table
    pub fn table_count(&self, table_name: &str) -> Result<u64> {
        table_count(&self.conn, table_name)
    }
}

/// Run `PRAGMA integrity_check` and return its first line ("ok" when healthy)
pub(crate) fn integrity_check(conn: &Connection) -> Result<String> {
    conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))
        .map_err(|e| DatabaseError::sql("PRAGMA integrity_check", &[], e))
}

pub(crate) fn table_count(conn: &Connection, table_name: &str) -> Result<u64> {
    let query = format!("SELECT COUNT(*) FROM \"{}\"", table_name.replace('"', "\"\""));
    conn.query_row(&query, [], |row| row.get(0))
        .map_err(|e| DatabaseError::sql(&query, &[], e))
}

pub(crate) fn approximate_size(conn: &Connection) -> Result<u64> {
    let page_count: u64 = conn
        .query_row("PRAGMA page_count", [], |row| row.get(0))
        .map_err(|e| DatabaseError::sql("PRAGMA page_count", &[], e))?;
    let page_size: u64 = conn
        .query_row("PRAGMA page_size", [], |row| row.get(0))
        .map_err(|e| DatabaseError::sql("PRAGMA page_size", &[], e))?;
    Ok(page_count * page_size)
}

pub(crate) fn list_tables(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare(LIST_TABLES_SQL)
        .map_err(|e| DatabaseError::sql(LIST_TABLES_SQL, &[], e))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
        .map_err(|e| DatabaseError::sql(LIST_TABLES_SQL, &[], e))?;
    Ok(names)
}
