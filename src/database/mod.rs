//! Database module
//!
//! This module provides all database functionality for finapp, organized into:
//!
//! - **core**: Core database infrastructure (SQLite driver, connection, schema, retry)
//! - **manager**: The single connection owner with serialized, retried opening
//! - **init**: Startup coordination on top of the manager
//! - **finapp**: Repositories for users, todos, settings and finance data
//!
//! # Architecture
//!
//! ```text
//! database/
//! ├── core/           # Foundation
//! │   ├── driver      # Where the SQLite file lives, open/delete
//! │   ├── connection  # DatabaseConn wrapper and pragmas
//! │   ├── schema      # Table definitions, initialization, verification
//! │   └── retry       # Bounded retry policy
//! │
//! ├── manager         # ConnectionManager and DbHandle
//! ├── init            # InitCoordinator and listeners
//! │
//! └── finapp/         # Persistent data
//!     ├── users
//!     ├── todos
//!     ├── settings
//!     ├── accounts
//!     ├── transactions
//!     └── budgets
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use finapp::database::{ConnectionManager, InitCoordinator, SqliteDriver, UserRepository};
//!
//! let manager = Arc::new(ConnectionManager::new(SqliteDriver::in_dir("~/.finapp")));
//! let coordinator = InitCoordinator::new(manager.clone());
//! coordinator.initialize_with_default_timeout().await?;
//!
//! let db = manager.get_database()?;
//! let users = db.with_conn(|conn| UserRepository::new(conn).count())?;
//! ```

pub mod core;
pub mod finapp;
mod init;
mod manager;

#[cfg(test)]
mod test_support;

// Driver, connection and schema management
pub use core::{
    DatabaseConn, DatabaseDriver, DatabaseError, DatabaseLocation, Exhausted, Result,
    RetryPolicy, SchemaDefinitions, SchemaManager, SchemaStatus, SharedError, SqliteDriver,
    DATABASE_NAME, REQUIRED_TABLES,
};

// Connection ownership and startup
pub use init::{
    InitCoordinator, InitOptions, InitStatus, ListenerId, StartupView, DEFAULT_STARTUP_TIMEOUT,
};
pub use manager::{ConnectionManager, DatabaseInfo, DbHandle, RecoveryMode};

// Repositories
pub use finapp::{
    Account, AccountRepository, AccountType, Budget, BudgetPeriod, BudgetRepository,
    CategoryTotal, NewAccount, NewBudget, NewTodo, NewTransaction, Reminder, Setting,
    SettingsRepository, Todo, TodoRepository, Transaction, TransactionRepository,
    TransactionType, User, UserRepository, UNCATEGORIZED,
};

/// Ensure the data directory exists
pub fn ensure_data_dir(data_dir: &str) -> anyhow::Result<()> {
    std::fs::create_dir_all(data_dir)
        .map_err(|e| anyhow::anyhow!("Failed to create data directory '{}': {}", data_dir, e))
}
