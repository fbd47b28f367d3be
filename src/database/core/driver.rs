//! Embedded database driver abstraction
//!
//! The connection manager never talks to the filesystem directly. It asks a
//! [`DatabaseDriver`] to open, delete and measure the database so the retry and
//! recovery logic can be exercised against scripted failures.

use std::path::{Path, PathBuf};

use rusqlite::Connection;
use tracing::debug;

use super::error::Result;

/// File name of the application database inside the data directory
pub const DATABASE_NAME: &str = "finapp.db";

/// Where a driver keeps its database
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseLocation {
    File(PathBuf),
    Memory,
}

impl DatabaseLocation {
    pub fn describe(&self) -> String {
        match self {
            DatabaseLocation::File(p) => p.to_string_lossy().to_string(),
            DatabaseLocation::Memory => ":memory:".to_string(),
        }
    }

    /// File name without its directory
    pub fn name(&self) -> String {
        match self {
            DatabaseLocation::File(p) => p
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| self.describe()),
            DatabaseLocation::Memory => ":memory:".to_string(),
        }
    }
}

/// Operations the connection manager needs from the embedded engine
pub trait DatabaseDriver: Send + Sync {
    /// Open a new raw connection
    fn open(&self) -> Result<Connection>;

    /// Delete the underlying database
    ///
    /// Returns `Ok(false)` when there was nothing to delete.
    fn delete(&self) -> Result<bool>;

    /// Size of the database file on disk, if it has one
    fn file_size(&self) -> Option<u64>;

    /// Where this driver keeps its data
    fn location(&self) -> DatabaseLocation;
}

/// Default SQLite driver backed by `rusqlite`
#[derive(Debug, Clone)]
pub struct SqliteDriver {
    location: DatabaseLocation,
}

impl SqliteDriver {
    /// Driver for a database file at `path`
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            location: DatabaseLocation::File(path.into()),
        }
    }

    /// Driver for `{data_dir}/finapp.db`
    pub fn in_dir(data_dir: impl AsRef<Path>) -> Self {
        Self::file(data_dir.as_ref().join(DATABASE_NAME))
    }

    /// Driver for a private in-memory database
    ///
    /// Every `open()` yields a fresh, empty database.
    pub fn in_memory() -> Self {
        Self {
            location: DatabaseLocation::Memory,
        }
    }
}

impl DatabaseDriver for SqliteDriver {
    fn open(&self) -> Result<Connection> {
        let conn = match &self.location {
            DatabaseLocation::File(path) => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent)?;
                    }
                }
                Connection::open(path)
            }
            DatabaseLocation::Memory => Connection::open_in_memory(),
        };
        conn.map_err(|e| super::error::DatabaseError::sql("open", &[], e))
    }

    fn delete(&self) -> Result<bool> {
        let path = match &self.location {
            DatabaseLocation::File(path) => path,
            DatabaseLocation::Memory => return Ok(false),
        };

        let mut removed = false;
        for candidate in sidecar_paths(path) {
            match std::fs::remove_file(&candidate) {
                Ok(()) => {
                    debug!("Removed {}", candidate.display());
                    removed = true;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(removed)
    }

    fn file_size(&self) -> Option<u64> {
        match &self.location {
            DatabaseLocation::File(path) => std::fs::metadata(path).ok().map(|m| m.len()),
            DatabaseLocation::Memory => None,
        }
    }

    fn location(&self) -> DatabaseLocation {
        self.location.clone()
    }
}

/// The database file plus the WAL and shared-memory files SQLite keeps next to it
fn sidecar_paths(path: &Path) -> Vec<PathBuf> {
    let base = path.to_string_lossy().to_string();
    vec![
        path.to_path_buf(),
        PathBuf::from(format!("{}-wal", base)),
        PathBuf::from(format!("{}-shm", base)),
        PathBuf::from(format!("{}-journal", base)),
    ]
}
