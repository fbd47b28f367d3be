use anyhow::Result;
use clap::Args;
use finapp::database::RecoveryMode;
use finapp::{FinappConfig, OutputFormat};
use serde::Serialize;

use super::print_value;

/// Arguments for the Config command
#[derive(Args)]
pub struct ConfigArgs {
    /// Also print the path of the configuration file
    #[clap(short, long)]
    pub verbose: bool,
}

#[derive(Debug, Serialize)]
struct ConfigInfo {
    config_file: String,
    data_dir: String,
    database_path: String,
    database_exists: bool,
    open_max_attempts: u32,
    open_retry_delay_ms: u64,
    open_retry_jitter_ms: u64,
    init_max_attempts: u32,
    init_retry_delay_ms: u64,
    startup_timeout_secs: u64,
    recovery_mode: RecoveryMode,
}

pub fn run(config: &FinappConfig, args: ConfigArgs, output_format: OutputFormat) -> Result<()> {
    let ConfigArgs { verbose } = args;
    let database_path = config.database_path();

    let info = ConfigInfo {
        config_file: FinappConfig::config_file_path(),
        data_dir: config.data_dir.clone(),
        database_path: database_path.to_string_lossy().to_string(),
        database_exists: database_path.exists(),
        open_max_attempts: config.open_max_attempts,
        open_retry_delay_ms: config.open_retry_delay_ms,
        open_retry_jitter_ms: config.open_retry_jitter_ms,
        init_max_attempts: config.init_max_attempts,
        init_retry_delay_ms: config.init_retry_delay_ms,
        startup_timeout_secs: config.startup_timeout_secs,
        recovery_mode: config.recovery_mode,
    };

    print_value(&info, output_format, |info| {
        if verbose {
            println!("Config File:        {}", info.config_file);
        }
        println!("{}", config.summary());
        if !info.database_exists {
            eprintln!();
            eprintln!("Database not created yet, run: finapp db init");
        }
    })
}
