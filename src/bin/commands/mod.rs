pub mod config;
pub mod database;
pub mod finance;
pub mod todo;
pub mod user;

use anyhow::{anyhow, Result};
use finapp::database::{ensure_data_dir, DbHandle, InitCoordinator, User, UserRepository};
use finapp::{FinappConfig, OutputFormat};
use serde::Serialize;
use tracing::info;

/// Bring the database up through the startup coordinator
pub(crate) async fn open_database(config: &FinappConfig) -> Result<(InitCoordinator, DbHandle)> {
    ensure_data_dir(&config.data_dir)?;
    let coordinator = config.init_coordinator();
    coordinator
        .initialize_with_default_timeout()
        .await
        .map_err(|e| anyhow!("Unable to open database: {}", e))?;
    let db = coordinator.manager().get_database()?;
    info!("Database ready after {} attempt(s)", coordinator.init_attempts());
    Ok((coordinator, db))
}

/// Look up a user by email, failing when they are not registered
pub(crate) fn find_user(db: &DbHandle, email: &str) -> Result<User> {
    let email = email.trim().to_lowercase();
    db.with_conn(|conn| UserRepository::new(conn).find_by_email(&email))?
        .ok_or_else(|| anyhow!("No user registered with email '{}'", email))
}

/// Print rows as a table or as JSON
pub(crate) fn print_rows<T>(rows: &[T], output_format: OutputFormat) -> Result<()>
where
    T: Serialize + tabled::Tabled,
{
    if rows.is_empty() && !output_format.is_json() {
        eprintln!("No entries found");
        return Ok(());
    }
    println!("{}", output_format.render_rows(rows)?);
    Ok(())
}

/// Print a single value as JSON, or hand it to `table` for text output
pub(crate) fn print_value<T: Serialize>(
    value: &T,
    output_format: OutputFormat,
    table: impl FnOnce(&T),
) -> Result<()> {
    if output_format.is_json() {
        println!("{}", output_format.to_json(value)?);
    } else {
        table(value);
    }
    Ok(())
}

/// Display helper for optional cells
pub(crate) fn display_opt<T: std::fmt::Display>(value: &Option<T>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => "-".to_string(),
    }
}
