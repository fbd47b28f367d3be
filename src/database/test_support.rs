//! Scripted driver used by the connection manager and coordinator tests

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use rusqlite::{ffi, Connection};

use crate::database::core::{
    DatabaseDriver, DatabaseError, DatabaseLocation, Result, SqliteDriver,
};

#[derive(Default)]
struct Script {
    fail_next: AtomicU32,
    break_schema_next: AtomicU32,
    corrupt: AtomicBool,
    open_calls: AtomicU32,
    delete_calls: AtomicU32,
}

/// Wraps a real [`SqliteDriver`] and fails a configurable number of opens
#[derive(Clone)]
pub(crate) struct ScriptedDriver {
    inner: SqliteDriver,
    script: Arc<Script>,
}

impl ScriptedDriver {
    pub(crate) fn in_memory() -> Self {
        Self::wrap(SqliteDriver::in_memory())
    }

    pub(crate) fn wrap(inner: SqliteDriver) -> Self {
        Self {
            inner,
            script: Arc::new(Script::default()),
        }
    }

    /// Fail the next `n` opens with a generic "cannot open" error
    pub(crate) fn fail_next(&self, n: u32) -> &Self {
        self.script.fail_next.store(n, Ordering::SeqCst);
        self
    }

    /// Let the next `n` opens succeed, but with the `accounts` name taken by an
    /// index so schema creation fails on them
    pub(crate) fn break_schema_next(&self, n: u32) -> &Self {
        self.script.break_schema_next.store(n, Ordering::SeqCst);
        self
    }

    /// Make scripted failures look like a corrupt file
    pub(crate) fn corrupt(&self) -> &Self {
        self.script.corrupt.store(true, Ordering::SeqCst);
        self
    }

    pub(crate) fn open_calls(&self) -> u32 {
        self.script.open_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn delete_calls(&self) -> u32 {
        self.script.delete_calls.load(Ordering::SeqCst)
    }
}

impl DatabaseDriver for ScriptedDriver {
    fn open(&self) -> Result<Connection> {
        self.script.open_calls.fetch_add(1, Ordering::SeqCst);

        let should_fail = self
            .script
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            let code = if self.script.corrupt.load(Ordering::SeqCst) {
                ffi::SQLITE_NOTADB
            } else {
                ffi::SQLITE_CANTOPEN
            };
            return Err(DatabaseError::sql(
                "open",
                &[],
                rusqlite::Error::SqliteFailure(ffi::Error::new(code), None),
            ));
        }

        let conn = self.inner.open()?;
        let break_schema = self
            .script
            .break_schema_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if break_schema {
            let sql = "CREATE TABLE IF NOT EXISTS blocker (x INTEGER); \
                 CREATE INDEX IF NOT EXISTS accounts ON blocker(x);";
            conn.execute_batch(sql)
                .map_err(|e| DatabaseError::sql(sql, &[], e))?;
        }
        Ok(conn)
    }

    fn delete(&self) -> Result<bool> {
        self.script.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.delete()
    }

    fn file_size(&self) -> Option<u64> {
        self.inner.file_size()
    }

    fn location(&self) -> DatabaseLocation {
        self.inner.location()
    }
}
