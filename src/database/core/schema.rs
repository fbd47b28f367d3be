//! Database schema management
//!
//! This module provides schema definitions and management for the finapp database.
//! All tables are defined here to ensure consistency and enable cross-table queries.
//!
//! There is no versioning: every statement is idempotent and a schema that can no
//! longer be repaired in place is recovered by deleting the database file.

use rusqlite::Connection;
use tracing::{debug, info, warn};

use super::connection::{integrity_check, list_tables};
use super::error::{DatabaseError, Result};

/// Tables that must exist after initialization, in creation order
pub const REQUIRED_TABLES: &[&str] = &[
    "users",
    "settings",
    "todos",
    "accounts",
    "transactions",
    "budgets",
];

/// Schema definitions for all tables in the finapp database
pub struct SchemaDefinitions;

impl SchemaDefinitions {
    pub const USERS_TABLE: &'static str = r#"
        CREATE TABLE IF NOT EXISTS users (
            user_id INTEGER PRIMARY KEY AUTOINCREMENT,
            full_name TEXT NOT NULL DEFAULT '',
            email TEXT UNIQUE NOT NULL,
            password_hash TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );
    "#;

    pub const SETTINGS_TABLE: &'static str = r#"
        CREATE TABLE IF NOT EXISTS settings (
            setting_id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            UNIQUE (user_id, key),
            FOREIGN KEY (user_id) REFERENCES users(user_id) ON DELETE CASCADE
        );
    "#;

    pub const TODOS_TABLE: &'static str = r#"
        CREATE TABLE IF NOT EXISTS todos (
            todo_id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER,
            title TEXT NOT NULL,
            description TEXT,
            completed INTEGER NOT NULL DEFAULT 0,
            has_reminder INTEGER NOT NULL DEFAULT 0,
            reminder_date TEXT,
            reminder_time TEXT,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (user_id, title),
            FOREIGN KEY (user_id) REFERENCES users(user_id) ON DELETE CASCADE
        );
    "#;

    pub const ACCOUNTS_TABLE: &'static str = r#"
        CREATE TABLE IF NOT EXISTS accounts (
            account_id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            type TEXT NOT NULL CHECK(type IN ('Checking', 'Savings', 'Credit Card', 'Investment', 'Cash', 'Other')),
            balance REAL NOT NULL DEFAULT 0.0,
            currency TEXT NOT NULL DEFAULT 'USD',
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (user_id) REFERENCES users(user_id) ON DELETE CASCADE
        );
    "#;

    pub const TRANSACTIONS_TABLE: &'static str = r#"
        CREATE TABLE IF NOT EXISTS transactions (
            transaction_id INTEGER PRIMARY KEY AUTOINCREMENT,
            account_id INTEGER NOT NULL,
            user_id INTEGER NOT NULL,
            description TEXT,
            amount REAL NOT NULL,
            type TEXT NOT NULL CHECK(type IN ('income', 'expense')),
            category TEXT,
            date TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (account_id) REFERENCES accounts(account_id) ON DELETE CASCADE,
            FOREIGN KEY (user_id) REFERENCES users(user_id) ON DELETE CASCADE
        );
    "#;

    pub const BUDGETS_TABLE: &'static str = r#"
        CREATE TABLE IF NOT EXISTS budgets (
            budget_id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            category TEXT NOT NULL,
            amount REAL NOT NULL,
            period TEXT NOT NULL CHECK(period IN ('weekly', 'monthly', 'yearly', 'custom')),
            start_date TEXT NOT NULL,
            end_date TEXT,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (user_id) REFERENCES users(user_id) ON DELETE CASCADE
        );
    "#;

    pub const INDEXES: &'static [&'static str] = &[
        "CREATE INDEX IF NOT EXISTS idx_settings_user_key ON settings(user_id, key)",
        "CREATE INDEX IF NOT EXISTS idx_todos_user_id ON todos(user_id)",
        "CREATE INDEX IF NOT EXISTS idx_accounts_user_id ON accounts(user_id)",
        "CREATE INDEX IF NOT EXISTS idx_transactions_user_id ON transactions(user_id)",
        "CREATE INDEX IF NOT EXISTS idx_transactions_account_id ON transactions(account_id)",
        "CREATE INDEX IF NOT EXISTS idx_transactions_date ON transactions(date)",
        "CREATE INDEX IF NOT EXISTS idx_transactions_category ON transactions(category)",
        "CREATE INDEX IF NOT EXISTS idx_budgets_user_id ON budgets(user_id)",
        "CREATE INDEX IF NOT EXISTS idx_budgets_category ON budgets(category)",
    ];

    /// Table statements paired with the table they create
    pub fn tables() -> [(&'static str, &'static str); 6] {
        [
            ("users", Self::USERS_TABLE),
            ("settings", Self::SETTINGS_TABLE),
            ("todos", Self::TODOS_TABLE),
            ("accounts", Self::ACCOUNTS_TABLE),
            ("transactions", Self::TRANSACTIONS_TABLE),
            ("budgets", Self::BUDGETS_TABLE),
        ]
    }
}

/// Schema manager for the finapp database
///
/// Handles schema creation and verification.
pub struct SchemaManager<'a> {
    conn: &'a Connection,
}

impl<'a> SchemaManager<'a> {
    /// Create a new schema manager for the given connection
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Initialize the database schema
    ///
    /// Creates all tables and indexes inside a single transaction, then checks
    /// that every required table is present.
    pub fn initialize(&self) -> Result<()> {
        self.conn
            .execute("PRAGMA foreign_keys = ON", [])
            .map_err(|e| DatabaseError::sql("PRAGMA foreign_keys = ON", &[], e))?;

        match integrity_check(self.conn)? {
            result if result == "ok" => debug!("Database integrity: ok"),
            result => warn!("Database integrity check reported: {}", result),
        }

        // Dropping an uncommitted transaction rolls it back
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(|e| DatabaseError::sql("BEGIN", &[], e))?;

        for (name, sql) in SchemaDefinitions::tables() {
            tx.execute(sql, [])
                .map_err(|e| DatabaseError::sql(sql, &[], e))?;
            debug!("Table '{}' created", name);
        }

        for index_sql in SchemaDefinitions::INDEXES {
            tx.execute(index_sql, [])
                .map_err(|e| DatabaseError::sql(index_sql, &[], e))?;
        }

        tx.commit()
            .map_err(|e| DatabaseError::sql("COMMIT", &[], e))?;

        self.verify()?;
        info!("Database schema initialized");
        Ok(())
    }

    /// Tables from [`REQUIRED_TABLES`] that do not exist
    pub fn missing_tables(&self) -> Result<Vec<String>> {
        let existing = list_tables(self.conn)?;
        debug!("Existing tables: {:?}", existing);

        Ok(REQUIRED_TABLES
            .iter()
            .filter(|table| !existing.iter().any(|e| e == *table))
            .map(|table| table.to_string())
            .collect())
    }

    /// Verify every required table exists
    pub fn verify(&self) -> Result<()> {
        let missing = self.missing_tables()?;
        if missing.is_empty() {
            Ok(())
        } else {
            warn!("Missing tables: {:?}", missing);
            Err(DatabaseError::MissingTables(missing))
        }
    }

    /// Check the current schema status
    pub fn check_status(&self) -> Result<SchemaStatus> {
        let missing = self.missing_tables()?;
        if missing.is_empty() {
            Ok(SchemaStatus::Current)
        } else if missing.len() == REQUIRED_TABLES.len() {
            Ok(SchemaStatus::NotInitialized)
        } else {
            Ok(SchemaStatus::Incomplete { missing })
        }
    }

    /// Reset the database by dropping all tables
    pub fn reset(&self) -> Result<()> {
        // Children before parents so foreign keys never dangle mid-way
        for table in REQUIRED_TABLES.iter().rev() {
            let sql = format!("DROP TABLE IF EXISTS {}", table);
            self.conn
                .execute(&sql, [])
                .map_err(|e| DatabaseError::sql(&sql, &[], e))?;
        }
        Ok(())
    }
}

/// Status of the database schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaStatus {
    /// Database is not initialized (fresh database)
    NotInitialized,

    /// Every required table exists
    Current,

    /// Some required tables exist, these do not
    Incomplete { missing: Vec<String> },
}
