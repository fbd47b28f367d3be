use anyhow::{anyhow, Result};
use clap::{Args, Subcommand};
use finapp::database::{ensure_data_dir, DatabaseInfo, InitStatus};
use finapp::{format_size, FinappConfig, OutputFormat};
use serde::Serialize;
use tabled::Tabled;

use super::{open_database, print_rows, print_value};

/// Arguments for the Database command
#[derive(Args)]
pub struct DatabaseArgs {
    #[clap(subcommand)]
    pub command: Option<DatabaseCommands>,
}

/// Database subcommands
#[derive(Subcommand)]
pub enum DatabaseCommands {
    /// Show database status (default when no subcommand)
    Status,

    /// Open the database, creating and verifying the schema
    Init,

    /// Delete the database file and create an empty one
    Reset {
        /// Skip confirmation prompt
        #[clap(long, short = 'y')]
        yes: bool,
    },

    /// List tables with their row counts
    Tables,
}

#[derive(Debug, Serialize)]
struct DatabaseStatus {
    status: InitStatus,
    init_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_error: Option<String>,
    database: DatabaseInfo,
}

#[derive(Tabled, Serialize)]
struct TableRow {
    table: String,
    records: i64,
}

pub async fn run(config: &FinappConfig, args: DatabaseArgs, output_format: OutputFormat) -> Result<()> {
    match args.command {
        None | Some(DatabaseCommands::Status) => run_status(config, output_format).await,
        Some(DatabaseCommands::Init) => run_init(config, output_format).await,
        Some(DatabaseCommands::Reset { yes }) => run_reset(config, yes, output_format).await,
        Some(DatabaseCommands::Tables) => run_tables(config, output_format).await,
    }
}

async fn run_status(config: &FinappConfig, output_format: OutputFormat) -> Result<()> {
    ensure_data_dir(&config.data_dir)?;
    let coordinator = config.init_coordinator();
    // A failed startup is part of the status, not an error of this command
    let _ = coordinator.initialize_with_default_timeout().await;

    let status = DatabaseStatus {
        status: coordinator.status(),
        init_attempts: coordinator.init_attempts(),
        last_error: coordinator.last_error().map(|e| e.to_string()),
        database: coordinator.manager().database_info(),
    };

    print_value(&status, output_format, print_status_table)
}

fn print_status_table(status: &DatabaseStatus) {
    let info = &status.database;
    println!("Finapp Database Status");
    println!("======================\n");

    println!("  Location:       {}", info.location);
    if let Some(size) = info.file_size_bytes {
        println!("  File Size:      {}", format_size(size));
    }
    if let Some(size) = info.approximate_size_bytes {
        println!("  Page Size:      {}", format_size(size));
    }
    println!(
        "  Startup:        {:?} after {} attempt(s)",
        status.status, status.init_attempts
    );
    println!(
        "  Schema:         {}",
        if info.tables_initialized {
            "initialized"
        } else {
            "not initialized"
        }
    );
    if let Some(err) = &status.last_error {
        println!("  Last Error:     {}", err);
    }

    if !info.record_counts.is_empty() {
        println!();
        println!("Tables:");
        for (table, count) in &info.record_counts {
            println!("  {:15} {} records", format!("{}:", table), count);
        }
    }

    eprintln!();
    eprintln!("Commands:");
    eprintln!("  finapp db init       Create and verify the schema");
    eprintln!("  finapp db reset -y   Delete the database and start over");
    eprintln!("  finapp db tables     List tables with row counts");
}

async fn run_init(config: &FinappConfig, output_format: OutputFormat) -> Result<()> {
    let (coordinator, _db) = open_database(config).await?;
    let info = coordinator.manager().database_info();

    print_value(&info, output_format, |info| {
        println!(
            "Database ready at {} ({} tables, {} attempt(s))",
            info.location,
            info.tables.len(),
            coordinator.init_attempts()
        );
    })
}

async fn run_reset(config: &FinappConfig, yes: bool, output_format: OutputFormat) -> Result<()> {
    if !yes {
        return Err(anyhow!(
            "Resetting deletes every user, todo and transaction. Re-run with --yes to confirm"
        ));
    }

    ensure_data_dir(&config.data_dir)?;
    let manager = config.connection_manager();
    manager
        .reset_database()
        .await
        .map_err(|e| anyhow!("Unable to reset database: {}", e))?;
    let info = manager.database_info();
    manager.close().await?;

    print_value(&info, output_format, |info| {
        println!("Database at {} reset", info.location);
    })
}

async fn run_tables(config: &FinappConfig, output_format: OutputFormat) -> Result<()> {
    let (coordinator, _db) = open_database(config).await?;
    let info = coordinator.manager().database_info();
    if let Some(err) = info.error {
        return Err(anyhow!(err));
    }

    let rows: Vec<TableRow> = info
        .record_counts
        .into_iter()
        .map(|(table, records)| TableRow { table, records })
        .collect();
    print_rows(&rows, output_format)
}
