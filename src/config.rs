use anyhow::{anyhow, Result};
use config::Config;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::database::{
    ConnectionManager, InitCoordinator, InitOptions, RecoveryMode, RetryPolicy, SqliteDriver,
    DATABASE_NAME, DEFAULT_STARTUP_TIMEOUT,
};

pub struct FinappConfig {
    /// Path to the directory holding finapp's data
    pub data_dir: String,

    /// File name of the SQLite database inside `data_dir`
    pub database_name: String,

    /// Connection manager retry policy
    pub open_max_attempts: u32,
    pub open_retry_delay_ms: u64,
    pub open_retry_jitter_ms: u64,

    /// Startup coordinator retry policy
    pub init_max_attempts: u32,
    pub init_retry_delay_ms: u64,

    /// Ceiling for the whole startup sequence
    pub startup_timeout_secs: u64,

    /// When a failed open may delete the database file
    pub recovery_mode: RecoveryMode,
}

const EMPTY_CONFIG: &str = r#"### finapp configuration file

### directory for the finapp database
# data_dir = "~/.finapp"
# database_name = "finapp.db"

### opening the database (connection manager)
# open_max_attempts = 5
# open_retry_delay_ms = 1500
# open_retry_jitter_ms = 0

### startup coordination
# init_max_attempts = 3
# init_retry_delay_ms = 0
# startup_timeout_secs = 30

### delete the database file before retrying: never, on-corruption, always
# recovery_mode = "on-corruption"
"#;

impl Default for FinappConfig {
    fn default() -> Self {
        let home_dir = dirs::home_dir()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|| ".".to_string());

        let open = RetryPolicy::connection();
        let init = RetryPolicy::initialization();
        Self {
            data_dir: format!("{}/.finapp", home_dir),
            database_name: DATABASE_NAME.to_string(),
            open_max_attempts: open.max_attempts,
            open_retry_delay_ms: open.delay.as_millis() as u64,
            open_retry_jitter_ms: open.jitter.as_millis() as u64,
            init_max_attempts: init.max_attempts,
            init_retry_delay_ms: init.delay.as_millis() as u64,
            startup_timeout_secs: DEFAULT_STARTUP_TIMEOUT.as_secs(),
            recovery_mode: RecoveryMode::default(),
        }
    }
}

impl FinappConfig {
    /// Function to create and initialize a new configuration
    pub fn new(path: &Option<String>) -> Result<FinappConfig> {
        let mut builder = Config::builder();

        // By default use $HOME/.finapp/finapp.toml as the configuration file path
        let home_dir = dirs::home_dir()
            .ok_or_else(|| anyhow!("Could not find home directory"))?
            .to_str()
            .ok_or_else(|| anyhow!("Could not convert home directory path to string"))?
            .to_owned();

        // Config dir
        let finapp_dir = format!("{}/.finapp", home_dir.as_str());

        // Add in toml configuration file
        match path {
            Some(p) => {
                let path = Path::new(p.as_str());
                if path.exists() {
                    let path_str = path
                        .to_str()
                        .ok_or_else(|| anyhow!("Could not convert path to string"))?;
                    builder = builder.add_source(config::File::with_name(path_str));
                } else {
                    std::fs::write(p.as_str(), EMPTY_CONFIG)
                        .map_err(|e| anyhow!("Unable to create config file: {}", e))?;
                }
            }
            None => {
                std::fs::create_dir_all(finapp_dir.as_str())
                    .map_err(|e| anyhow!("Unable to create finapp directory: {}", e))?;
                let p = format!("{}/finapp.toml", finapp_dir.as_str());
                if Path::new(p.as_str()).exists() {
                    builder = builder.add_source(config::File::with_name(p.as_str()));
                } else {
                    std::fs::write(p.as_str(), EMPTY_CONFIG).map_err(|e| {
                        anyhow!("Unable to create config file {}: {}", p.as_str(), e)
                    })?;
                }
            }
        }

        // Add in settings from the environment (with a prefix of FINAPP)
        // E.g., `FINAPP_DATA_DIR=/tmp/finapp ./finapp` would set the data directory
        builder = builder.add_source(config::Environment::with_prefix("FINAPP"));

        let settings = builder
            .build()
            .map_err(|e| anyhow!("Failed to build configuration: {}", e))?;

        let config = settings
            .try_deserialize::<HashMap<String, String>>()
            .map_err(|e| anyhow!("Failed to deserialize configuration: {}", e))?;

        Self::from_map(&config, &finapp_dir)
    }

    /// Build a configuration from flattened key/value settings
    fn from_map(config: &HashMap<String, String>, default_dir: &str) -> Result<FinappConfig> {
        let defaults = FinappConfig::default();

        let data_dir = match config.get("data_dir") {
            Some(p) => expand_home(p),
            None => default_dir.to_string(),
        };

        let recovery_mode = match config.get("recovery_mode") {
            Some(mode) => mode.parse().map_err(|e: String| anyhow!(e))?,
            None => defaults.recovery_mode,
        };

        Ok(FinappConfig {
            data_dir,
            database_name: config
                .get("database_name")
                .cloned()
                .unwrap_or(defaults.database_name),
            open_max_attempts: parse_or(config, "open_max_attempts", defaults.open_max_attempts),
            open_retry_delay_ms: parse_or(
                config,
                "open_retry_delay_ms",
                defaults.open_retry_delay_ms,
            ),
            open_retry_jitter_ms: parse_or(
                config,
                "open_retry_jitter_ms",
                defaults.open_retry_jitter_ms,
            ),
            init_max_attempts: parse_or(config, "init_max_attempts", defaults.init_max_attempts),
            init_retry_delay_ms: parse_or(
                config,
                "init_retry_delay_ms",
                defaults.init_retry_delay_ms,
            ),
            startup_timeout_secs: parse_or(
                config,
                "startup_timeout_secs",
                defaults.startup_timeout_secs,
            ),
            recovery_mode,
        })
    }

    /// Get the path to the SQLite database file
    pub fn database_path(&self) -> PathBuf {
        Path::new(self.data_dir.trim_end_matches('/')).join(&self.database_name)
    }

    pub fn open_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::connection()
            .with_max_attempts(self.open_max_attempts)
            .with_delay(Duration::from_millis(self.open_retry_delay_ms))
            .with_jitter(Duration::from_millis(self.open_retry_jitter_ms))
    }

    pub fn init_options(&self) -> InitOptions {
        InitOptions {
            policy: RetryPolicy::initialization()
                .with_max_attempts(self.init_max_attempts)
                .with_delay(Duration::from_millis(self.init_retry_delay_ms)),
            startup_timeout: Duration::from_secs(self.startup_timeout_secs),
        }
    }

    /// Connection manager for the configured database file
    pub fn connection_manager(&self) -> ConnectionManager {
        ConnectionManager::new(SqliteDriver::file(self.database_path()))
            .with_retry_policy(self.open_retry_policy())
            .with_recovery_mode(self.recovery_mode)
    }

    /// Startup coordinator over a fresh connection manager
    pub fn init_coordinator(&self) -> InitCoordinator {
        InitCoordinator::with_options(Arc::new(self.connection_manager()), self.init_options())
    }

    /// Display configuration summary
    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("Data Directory:     {}", self.data_dir),
            format!("Database Path:      {}", self.database_path().display()),
            format!(
                "Open Retries:       {} attempts, {} ms apart (+{} ms jitter)",
                self.open_max_attempts, self.open_retry_delay_ms, self.open_retry_jitter_ms
            ),
            format!(
                "Startup Retries:    {} attempts, {} ms apart",
                self.init_max_attempts, self.init_retry_delay_ms
            ),
            format!("Startup Timeout:    {} seconds", self.startup_timeout_secs),
            format!("Recovery Mode:      {}", self.recovery_mode),
        ];

        if let Ok(meta) = std::fs::metadata(self.database_path()) {
            lines.push(format!("Database Size:      {}", format_size(meta.len())));
        }

        lines.join("\n")
    }

    /// Get the config file path
    pub fn config_file_path() -> String {
        let home_dir = dirs::home_dir()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|| "~".to_string());
        format!("{}/.finapp/finapp.toml", home_dir)
    }
}

fn parse_or<T: std::str::FromStr>(config: &HashMap<String, String>, key: &str, default: T) -> T {
    config
        .get(key)
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Expand a leading `~` to the home directory
fn expand_home(path: &str) -> String {
    match (path.strip_prefix('~'), dirs::home_dir()) {
        (Some(rest), Some(home)) => format!("{}{}", home.to_string_lossy(), rest),
        _ => path.to_string(),
    }
}

/// Format a byte size in human-readable form
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
