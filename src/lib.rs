#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! Finapp - local storage for a to-do and personal-finance client
//!
//! Finapp owns the application's single SQLite database: it opens it with
//! bounded retries, creates and verifies the schema, coordinates startup so
//! every caller sees one outcome, and exposes repositories for the stored data.
//! It can be used as both a command-line application and a library.
//!
//! # Feature Flags
//!
//! | Feature | Description | Key Dependencies |
//! |---------|-------------|------------------|
//! | (none) | Database, startup coordination, auth, config | `rusqlite`, `tokio`, `argon2` |
//! | `display` | Table formatting with `tabled` | `tabled` |
//! | `cli` | The `finapp` binary | All above + `clap`, `tracing-subscriber` |
//!
//! ```toml
//! # Library only
//! finapp = { version = "0.3", default-features = false }
//!
//! # Default (CLI binary)
//! finapp = "0.3"
//! ```
//!
//! # Architecture
//!
//! - **[`database`]**: All database functionality
//!   - `core`: driver, connection wrapper, schema, retry policy, errors
//!   - `ConnectionManager`: single owner of the handle, serialized opening
//!   - `InitCoordinator`: startup attempts, recovery, listeners, timeout
//!   - `finapp`: repositories for users, todos, settings, accounts,
//!     transactions and budgets
//! - **[`auth`]**: Registration and login with Argon2id password hashes
//! - **[`config`]**: Configuration management
//! - **[`output`]**: Output formats for the command line
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use finapp::FinappConfig;
//! use finapp::database::{NewTodo, TodoRepository};
//!
//! let config = FinappConfig::new(&None)?;
//! let coordinator = config.init_coordinator();
//! coordinator.initialize_with_default_timeout().await?;
//!
//! let db = coordinator.manager().get_database()?;
//! let todo = db.with_conn(|conn| {
//!     TodoRepository::new(conn).create(user_id, &NewTodo::titled("Pay rent"))
//! })?;
//! ```

pub mod auth;
pub mod config;
pub mod database;
pub mod output;

// =============================================================================
// Configuration
// =============================================================================

pub use config::{format_size, FinappConfig};

// =============================================================================
// Database Module - Re-export commonly used types
// =============================================================================

pub use database::{
    ConnectionManager, DatabaseError, DatabaseInfo, DbHandle, InitCoordinator, InitStatus,
    RecoveryMode, RetryPolicy, SharedError, SqliteDriver, StartupView,
};

// =============================================================================
// Auth and output
// =============================================================================

pub use auth::{AuthError, AuthService};
pub use output::OutputFormat;
