//! Connection manager
//!
//! Owns the single database handle of the application. Opening is serialized:
//! while one open sequence runs, later callers wait on the same lock and then
//! receive the outcome of the sequence they waited for instead of starting a
//! new one.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::database::core::{
    approximate_size, list_tables, table_count, DatabaseConn, DatabaseDriver, DatabaseError,
    Result, RetryPolicy, SchemaManager, SharedError,
};

/// When a failed open may delete the database file before the next attempt
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecoveryMode {
    /// Never delete; retries reopen the same file
    Never,
    /// Delete only after an attempt failed because the file is not a usable database
    #[default]
    OnCorruption,
    /// Delete before every retry, whatever the failure was
    Always,
}

impl RecoveryMode {
    /// Whether a retry should start from a deleted file
    pub fn deletes_on_retry(&self, corruption_seen: bool) -> bool {
        match self {
            RecoveryMode::Never => false,
            RecoveryMode::OnCorruption => corruption_seen,
            RecoveryMode::Always => true,
        }
    }
}

impl fmt::Display for RecoveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoveryMode::Never => write!(f, "never"),
            RecoveryMode::OnCorruption => write!(f, "on-corruption"),
            RecoveryMode::Always => write!(f, "always"),
        }
    }
}

impl FromStr for RecoveryMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "never" | "off" => Ok(RecoveryMode::Never),
            "on-corruption" | "corruption" => Ok(RecoveryMode::OnCorruption),
            "always" => Ok(RecoveryMode::Always),
            _ => Err(format!(
                "Unknown recovery mode '{}'. Valid modes: never, on-corruption, always",
                s
            )),
        }
    }
}

/// Shared reference to the open database connection
///
/// Cloning is cheap; all clones point at the same connection.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<Mutex<DatabaseConn>>,
}

impl DbHandle {
    fn new(db: DatabaseConn) -> Self {
        Self {
            inner: Arc::new(Mutex::new(db)),
        }
    }

    /// Run `f` with exclusive access to the connection
    pub fn with_conn<T, E>(
        &self,
        f: impl FnOnce(&Connection) -> std::result::Result<T, E>,
    ) -> std::result::Result<T, E>
    where
        E: From<DatabaseError>,
    {
        let guard = self
            .inner
            .lock()
            .map_err(|_| E::from(DatabaseError::LockPoisoned))?;
        f(&guard.conn)
    }

    /// Whether both handles refer to the same connection
    pub fn same_as(&self, other: &DbHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for DbHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbHandle")
            .field("refs", &Arc::strong_count(&self.inner))
            .finish()
    }
}

/// Diagnostic snapshot returned by [`ConnectionManager::database_info`]
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseInfo {
    pub is_open: bool,
    pub tables_initialized: bool,
    pub database_name: String,
    pub location: String,
    pub tables: Vec<String>,
    /// Row count per table, `-1` when counting failed
    pub record_counts: BTreeMap<String, i64>,
    /// `page_count * page_size`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approximate_size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Default)]
struct Slot {
    handle: Option<DbHandle>,
    schema_ready: bool,
    last_error: Option<SharedError>,
    /// Bumped every time an open sequence settles
    generation: u64,
}

/// Owner of the application's database handle
pub struct ConnectionManager {
    driver: Box<dyn DatabaseDriver>,
    policy: RetryPolicy,
    recovery: RecoveryMode,
    slot: Mutex<Slot>,
    open_lock: tokio::sync::Mutex<()>,
    opens: AtomicU64,
}

impl ConnectionManager {
    /// Create a manager with the default retry policy (5 attempts, 1.5 s apart)
    pub fn new(driver: impl DatabaseDriver + 'static) -> Self {
        Self {
            driver: Box::new(driver),
            policy: RetryPolicy::connection(),
            recovery: RecoveryMode::default(),
            slot: Mutex::new(Slot::default()),
            open_lock: tokio::sync::Mutex::new(()),
            opens: AtomicU64::new(0),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_recovery_mode(mut self, recovery: RecoveryMode) -> Self {
        self.recovery = recovery;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn recovery_mode(&self) -> RecoveryMode {
        self.recovery
    }

    /// Number of raw connections successfully opened by this manager
    pub fn open_count(&self) -> u64 {
        self.opens.load(Ordering::SeqCst)
    }

    fn slot(&self) -> Result<MutexGuard<'_, Slot>> {
        self.slot.lock().map_err(|_| DatabaseError::LockPoisoned)
    }

    /// Whether a handle is open and its schema verified
    pub fn is_ready(&self) -> bool {
        self.slot()
            .map(|slot| slot.handle.is_some() && slot.schema_ready)
            .unwrap_or(false)
    }

    /// Open the database, or return the already open handle
    pub async fn open(&self) -> std::result::Result<DbHandle, SharedError> {
        let seen = {
            let slot = self.slot()?;
            if let (Some(handle), true) = (&slot.handle, slot.schema_ready) {
                debug!("Database already open and tables initialized");
                return Ok(handle.clone());
            }
            slot.generation
        };

        if self.open_lock.try_lock().is_err() {
            info!("Database opening already in progress, waiting");
        }
        let _guard = self.open_lock.lock().await;

        {
            let slot = self.slot()?;
            if let (Some(handle), true) = (&slot.handle, slot.schema_ready) {
                return Ok(handle.clone());
            }
            if slot.generation != seen {
                if let Some(err) = &slot.last_error {
                    return Err(err.clone());
                }
            }
        }

        self.open_locked().await
    }

    /// Run a full open sequence; the caller holds `open_lock`
    async fn open_locked(&self) -> std::result::Result<DbHandle, SharedError> {
        info!("Opening database connection");
        self.drop_stale_handle()?;

        let corruption_seen = AtomicBool::new(false);
        let outcome = self
            .policy
            .run("open database", |attempt| {
                let result = self.open_attempt(attempt, corruption_seen.load(Ordering::SeqCst));
                if let Err(e) = &result {
                    if e.is_corruption() {
                        corruption_seen.store(true, Ordering::SeqCst);
                    }
                }
                std::future::ready(result)
            })
            .await;

        let mut slot = self.slot()?;
        slot.generation += 1;
        match outcome {
            Ok(handle) => {
                info!("Database connection open, all tables initialized");
                slot.handle = Some(handle.clone());
                slot.schema_ready = true;
                slot.last_error = None;
                Ok(handle)
            }
            Err(exhausted) => {
                error!(
                    "Failed to open database after {} attempts: {}",
                    exhausted.attempts, exhausted.last_error
                );
                let err = Arc::new(DatabaseError::OpenFailed {
                    attempts: exhausted.attempts,
                    source: Box::new(exhausted.last_error),
                });
                slot.handle = None;
                slot.schema_ready = false;
                slot.last_error = Some(err.clone());
                Err(err)
            }
        }
    }

    /// One attempt: optionally delete the file, open, configure and create the schema
    fn open_attempt(&self, attempt: u32, corruption_seen: bool) -> Result<DbHandle> {
        debug!(
            "Attempt {}/{} to open {}",
            attempt,
            self.policy.max_attempts,
            self.driver.location().describe()
        );

        if attempt > 1 && self.recovery.deletes_on_retry(corruption_seen) {
            info!("Deleting existing database file before retrying");
            match self.driver.delete() {
                Ok(true) => info!("Existing database deleted"),
                Ok(false) => debug!("No database file to delete"),
                Err(e) => warn!("Error deleting database, continuing: {}", e),
            }
        }

        let conn = self.driver.open()?;
        self.opens.fetch_add(1, Ordering::SeqCst);
        let db = DatabaseConn::from_connection(conn)?;

        // On failure `db` is dropped here, which tears the connection down
        SchemaManager::new(&db.conn).initialize()?;
        Ok(DbHandle::new(db))
    }

    /// Close whatever handle is left over, swallowing errors
    fn drop_stale_handle(&self) -> Result<()> {
        let stale = {
            let mut slot = self.slot()?;
            slot.schema_ready = false;
            slot.handle.take()
        };
        if let Some(handle) = stale {
            if let Err(e) = close_handle(handle) {
                warn!("Error closing existing database, continuing: {}", e);
            }
        }
        Ok(())
    }

    /// Close the database
    ///
    /// Waits for an in-flight open to settle first. Closing a manager that is
    /// not open does nothing.
    pub async fn close(&self) -> Result<()> {
        let _guard = self.open_lock.lock().await;
        self.close_locked()
    }

    fn close_locked(&self) -> Result<()> {
        let handle = {
            let mut slot = self.slot()?;
            slot.schema_ready = false;
            slot.last_error = None;
            slot.handle.take()
        };

        match handle {
            None => {
                debug!("Database not open, nothing to close");
                Ok(())
            }
            Some(handle) => {
                info!("Closing database");
                close_handle(handle)
            }
        }
    }

    /// Get the open handle without waiting
    pub fn get_database(&self) -> Result<DbHandle> {
        let slot = self.slot()?;
        match (&slot.handle, slot.schema_ready) {
            (Some(handle), true) => Ok(handle.clone()),
            (Some(_), false) => Err(DatabaseError::SchemaNotInitialized),
            (None, _) if slot.last_error.is_some() => Err(DatabaseError::SchemaNotInitialized),
            (None, _) => Err(DatabaseError::NotOpen),
        }
    }

    /// Delete the database file and open a fresh one
    ///
    /// Handles obtained before the reset are orphaned: they point at the
    /// deleted file, and writes through them either fail or are lost; they
    /// never reach the new database. Callers should fetch a new handle with
    /// [`get_database`](Self::get_database) afterwards.
    pub async fn reset_database(&self) -> std::result::Result<DbHandle, SharedError> {
        let _guard = self.open_lock.lock().await;
        info!("Resetting database");

        self.close_locked()?;
        match self.driver.delete() {
            Ok(true) => info!("Database deleted"),
            Ok(false) => debug!("No database file to delete"),
            Err(e) => {
                error!("Error deleting database: {}", e);
                return Err(Arc::new(e));
            }
        }

        self.open_locked().await
    }

    /// Diagnostic snapshot of the database
    pub fn database_info(&self) -> DatabaseInfo {
        let location = self.driver.location();
        let file_size_bytes = self.driver.file_size();

        let (handle, schema_ready) = match self.slot() {
            Ok(slot) => (slot.handle.clone(), slot.schema_ready),
            Err(e) => {
                warn!("Cannot read connection state: {}", e);
                (None, false)
            }
        };

        let mut info = DatabaseInfo {
            is_open: handle.is_some(),
            tables_initialized: schema_ready,
            database_name: location.name(),
            location: location.describe(),
            tables: Vec::new(),
            record_counts: BTreeMap::new(),
            approximate_size_bytes: None,
            file_size_bytes,
            error: None,
        };

        let Some(handle) = handle else {
            info.error = Some("Database not open".to_string());
            return info;
        };

        let collected = handle.with_conn(|conn| -> Result<_> {
            let tables = list_tables(conn)?;
            let counts = tables
                .iter()
                .map(|table| {
                    let count = match table_count(conn, table) {
                        Ok(c) => c as i64,
                        Err(e) => {
                            error!("Error counting records in {}: {}", table, e);
                            -1
                        }
                    };
                    (table.clone(), count)
                })
                .collect::<BTreeMap<_, _>>();
            let size = approximate_size(conn).ok();
            Ok((tables, counts, size))
        });

        match collected {
            Ok((tables, counts, size)) => {
                info.tables = tables;
                info.record_counts = counts;
                info.approximate_size_bytes = size;
            }
            Err(e) => {
                error!("Error getting database info: {}", e);
                info.error = Some(e.to_string());
            }
        }
        info
    }
}

/// Close the connection if this was the last reference to it
fn close_handle(handle: DbHandle) -> Result<()> {
    match Arc::try_unwrap(handle.inner) {
        Ok(mutex) => {
            let db = mutex.into_inner().map_err(|_| DatabaseError::LockPoisoned)?;
            db.conn
                .close()
                .map_err(|(_, e)| DatabaseError::sql("close", &[], e))?;
            info!("Database closed");
            Ok(())
        }
        Err(inner) => {
            // Outstanding clones keep the connection alive until they are dropped
            warn!(
                "Database handle still referenced by {} other owner(s); \
                 they keep the old connection and no longer see the managed database",
                Arc::strong_count(&inner) - 1
            );
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::core::{SqliteDriver, REQUIRED_TABLES};
    use crate::database::test_support::ScriptedDriver;

    fn fast_manager(driver: ScriptedDriver) -> ConnectionManager {
        ConnectionManager::new(driver).with_retry_policy(
            RetryPolicy::connection().with_delay(std::time::Duration::ZERO),
        )
    }

    #[tokio::test]
    async fn test_get_database_before_open_is_not_open() {
        let manager = fast_manager(ScriptedDriver::in_memory());
        assert!(matches!(
            manager.get_database(),
            Err(DatabaseError::NotOpen)
        ));
    }

    #[tokio::test]
    async fn test_open_creates_required_tables() {
        let manager = fast_manager(ScriptedDriver::in_memory());
        manager.open().await.unwrap();

        let info = manager.database_info();
        assert!(info.is_open);
        assert!(info.tables_initialized);
        for table in REQUIRED_TABLES {
            assert!(info.tables.iter().any(|t| t == table), "missing {table}");
            assert_eq!(info.record_counts.get(*table), Some(&0));
        }
        assert!(info.approximate_size_bytes.unwrap() > 0);
    }

    #[tokio::test]
    async fn test_second_open_reuses_handle() {
        let driver = ScriptedDriver::in_memory();
        let manager = fast_manager(driver.clone());

        let first = manager.open().await.unwrap();
        let second = manager.open().await.unwrap();

        assert!(first.same_as(&second));
        assert_eq!(driver.open_calls(), 1);
        assert_eq!(manager.open_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_opens_share_one_sequence() {
        let driver = ScriptedDriver::in_memory();
        let manager = fast_manager(driver.clone());

        let (a, b, c) = tokio::join!(manager.open(), manager.open(), manager.open());
        let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());

        assert!(a.same_as(&b));
        assert!(b.same_as(&c));
        assert_eq!(driver.open_calls(), 1);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let driver = ScriptedDriver::in_memory();
        driver.fail_next(2);
        let manager = fast_manager(driver.clone());

        manager.open().await.unwrap();
        assert_eq!(driver.open_calls(), 3);
        // Default recovery only deletes for corruption
        assert_eq!(driver.delete_calls(), 0);
    }

    #[tokio::test]
    async fn test_corruption_triggers_delete_on_retry() {
        let dir = tempfile::tempdir().unwrap();
        let driver = ScriptedDriver::wrap(SqliteDriver::in_dir(dir.path()));
        driver.fail_next(1).corrupt();
        let manager = fast_manager(driver.clone());

        manager.open().await.unwrap();
        assert_eq!(driver.open_calls(), 2);
        assert_eq!(driver.delete_calls(), 1);
    }

    #[tokio::test]
    async fn test_always_recovery_deletes_before_every_retry() {
        let driver = ScriptedDriver::in_memory();
        driver.fail_next(3);
        let manager = fast_manager(driver.clone()).with_recovery_mode(RecoveryMode::Always);

        manager.open().await.unwrap();
        assert_eq!(driver.delete_calls(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_open_reports_and_blocks_get_database() {
        let driver = ScriptedDriver::in_memory();
        driver.fail_next(10);
        let manager = fast_manager(driver.clone());

        let err = manager.open().await.unwrap_err();
        assert!(matches!(
            err.as_ref(),
            DatabaseError::OpenFailed { attempts: 5, .. }
        ));
        assert!(err
            .to_string()
            .starts_with("failed to open database after 5 attempts"));
        assert_eq!(driver.open_calls(), 5);
        assert!(matches!(
            manager.get_database(),
            Err(DatabaseError::SchemaNotInitialized)
        ));
        assert!(!manager.database_info().is_open);
    }

    #[tokio::test]
    async fn test_schema_failure_counts_as_failed_attempt() {
        let driver = ScriptedDriver::in_memory();
        driver.break_schema_next(2);
        let manager = fast_manager(driver.clone());

        manager.open().await.unwrap();
        assert_eq!(driver.open_calls(), 3);
        assert_eq!(manager.open_count(), 3);
        assert!(manager.is_ready());
    }

    #[tokio::test]
    async fn test_schema_failure_exhausts_retries() {
        let driver = ScriptedDriver::in_memory();
        driver.break_schema_next(10);
        let manager = fast_manager(driver.clone());

        let err = manager.open().await.unwrap_err();
        assert!(matches!(
            err.as_ref(),
            DatabaseError::OpenFailed { attempts: 5, .. }
        ));
        assert!(err.to_string().contains("accounts"));
        assert!(!err.is_corruption());
        assert_eq!(driver.open_calls(), 5);
        assert_eq!(driver.delete_calls(), 0);
        assert!(matches!(
            manager.get_database(),
            Err(DatabaseError::SchemaNotInitialized)
        ));
        assert!(!manager.database_info().is_open);
    }

    #[tokio::test]
    async fn test_waiters_receive_failure_of_sequence_they_waited_on() {
        let driver = ScriptedDriver::in_memory();
        driver.fail_next(10);
        // A real pause keeps the first sequence in flight while the second caller arrives
        let manager = ConnectionManager::new(driver.clone()).with_retry_policy(
            RetryPolicy::connection().with_delay(std::time::Duration::from_millis(10)),
        );

        let (a, b) = tokio::join!(manager.open(), manager.open());
        let (a, b) = (a.unwrap_err(), b.unwrap_err());

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(driver.open_calls(), 5);
    }

    #[tokio::test]
    async fn test_close_then_get_database() {
        let manager = fast_manager(ScriptedDriver::in_memory());
        manager.close().await.unwrap();

        manager.open().await.unwrap();
        assert!(manager.get_database().is_ok());

        manager.close().await.unwrap();
        assert!(matches!(
            manager.get_database(),
            Err(DatabaseError::NotOpen)
        ));
        assert!(!manager.is_ready());
    }

    #[tokio::test]
    async fn test_reset_database_starts_from_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let driver = ScriptedDriver::wrap(SqliteDriver::in_dir(dir.path()));
        let manager = fast_manager(driver.clone());

        let handle = manager.open().await.unwrap();
        handle
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO users (email, password_hash) VALUES ('a@b.c', 'x')",
                    [],
                )
                .map_err(|e| DatabaseError::sql("insert", &[], e))
            })
            .unwrap();
        drop(handle);

        let fresh = manager.reset_database().await.unwrap();
        let users: i64 = fresh
            .with_conn(|conn| {
                conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
                    .map_err(|e| DatabaseError::sql("count", &[], e))
            })
            .unwrap();

        assert_eq!(users, 0);
        assert_eq!(driver.delete_calls(), 1);
        assert_eq!(manager.open_count(), 2);
    }

    #[tokio::test]
    async fn test_reset_orphans_outstanding_handles() {
        let dir = tempfile::tempdir().unwrap();
        let driver = ScriptedDriver::wrap(SqliteDriver::in_dir(dir.path()));
        let manager = fast_manager(driver);

        let old = manager.open().await.unwrap();
        let fresh = manager.reset_database().await.unwrap();
        assert!(!old.same_as(&fresh));
        assert!(manager.get_database().unwrap().same_as(&fresh));

        // SQLite may refuse the write on a moved file; either way it must not show up
        let _ = old.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (email, password_hash) VALUES ('lost@b.c', 'x')",
                [],
            )
            .map_err(|e| DatabaseError::sql("insert", &[], e))
        });
        let users: i64 = fresh
            .with_conn(|conn| {
                conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
                    .map_err(|e| DatabaseError::sql("count", &[], e))
            })
            .unwrap();
        assert_eq!(users, 0);
    }

    #[tokio::test]
    async fn test_info_when_closed() {
        let manager = fast_manager(ScriptedDriver::in_memory());
        let info = manager.database_info();

        assert!(!info.is_open);
        assert!(!info.tables_initialized);
        assert_eq!(info.database_name, ":memory:");
        assert_eq!(info.error.as_deref(), Some("Database not open"));
    }

    #[test]
    fn test_recovery_mode_parsing() {
        assert_eq!("always".parse::<RecoveryMode>(), Ok(RecoveryMode::Always));
        assert_eq!(
            "on_corruption".parse::<RecoveryMode>(),
            Ok(RecoveryMode::OnCorruption)
        );
        assert!("sometimes".parse::<RecoveryMode>().is_err());
        assert_eq!(RecoveryMode::OnCorruption.to_string(), "on-corruption");
        assert!(!RecoveryMode::OnCorruption.deletes_on_retry(false));
        assert!(RecoveryMode::OnCorruption.deletes_on_retry(true));
    }
}
