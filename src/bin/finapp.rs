mod commands;

use clap::{Parser, Subcommand};
use finapp::{FinappConfig, OutputFormat};
use tracing_subscriber::EnvFilter;

use commands::config::ConfigArgs;
use commands::database::DatabaseArgs;
use commands::finance::{AccountArgs, BudgetArgs, TxArgs};
use commands::todo::TodoArgs;
use commands::user::UserArgs;

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
struct Cli {
    /// configuration file path, by default $HOME/.finapp/finapp.toml is used
    #[clap(short, long)]
    config: Option<String>,

    /// Print debug information
    #[clap(long)]
    debug: bool,

    /// Output format: table, json, json-pretty
    #[clap(short, long, global = true, default_value = "table")]
    format: OutputFormat,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database status, initialization and reset
    Db(DatabaseArgs),

    /// Register users and check credentials
    User(UserArgs),

    /// Manage a user's todo list
    Todo(TodoArgs),

    /// Manage accounts
    Account(AccountArgs),

    /// Record and list transactions
    Tx(TxArgs),

    /// Manage budgets
    Budget(BudgetArgs),

    /// Show the effective configuration
    Config(ConfigArgs),
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    if cli.debug {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = match FinappConfig::new(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            std::process::exit(1);
        }
    };

    let format = cli.format;
    let result = match cli.command {
        Commands::Db(args) => commands::database::run(&config, args, format).await,
        Commands::User(args) => commands::user::run(&config, args, format).await,
        Commands::Todo(args) => commands::todo::run(&config, args, format).await,
        Commands::Account(args) => commands::finance::run_account(&config, args, format).await,
        Commands::Tx(args) => commands::finance::run_tx(&config, args, format).await,
        Commands::Budget(args) => commands::finance::run_budget(&config, args, format).await,
        Commands::Config(args) => commands::config::run(&config, args, format),
    };

    if let Err(e) = result {
        eprintln!("ERROR: {:#}", e);
        std::process::exit(1);
    }
}
