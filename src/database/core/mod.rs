//! Core database infrastructure
//!
//! This module provides the foundational database components used throughout finapp:
//! - `DatabaseConn`: Core SQLite connection wrapper with configuration
//! - `DatabaseDriver`: Seam over the embedded engine (open, delete, measure)
//! - `SchemaManager`: Schema initialization and verification
//! - `RetryPolicy`: Bounded retry shared by the connection and startup layers
//! - `DatabaseError`: The flat error set of the database layer

mod connection;
mod driver;
mod error;
mod retry;
mod schema;

pub use connection::DatabaseConn;
pub(crate) use connection::{approximate_size, list_tables, table_count};
pub use driver::{DatabaseDriver, DatabaseLocation, SqliteDriver, DATABASE_NAME};
pub use error::{DatabaseError, Result, SharedError};
pub use retry::{Exhausted, RetryPolicy};
pub use schema::{SchemaDefinitions, SchemaManager, SchemaStatus, REQUIRED_TABLES};
