//! Configuration loading and management

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Main configuration for the ledger daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Shared ledger document. Relative paths resolve against the config
    /// directory.
    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,

    /// Recorded as `createdBy` on records this session creates
    #[serde(default = "default_user")]
    pub user: String,

    /// Wait after the first snapshot before recurring expansion (default: 2s)
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("ledger.json")
}

fn default_user() -> String {
    std::env::var("USER").unwrap_or_else(|_| "owner".to_string())
}

fn default_settle_delay_ms() -> u64 {
    2000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ledger_path: default_ledger_path(),
            user: default_user(),
            settle_delay_ms: default_settle_delay_ms(),
        }
    }
}

impl Config {
    /// Load configuration from the config directory
    pub fn load(config_path: &Path) -> Result<Self> {
        let config_file = config_path.join("config.json");

        let mut config = if config_file.exists() {
            let content = std::fs::read_to_string(&config_file)
                .with_context(|| format!("Failed to read config file: {:?}", config_file))?;
            let config: Config = serde_json::from_str(&content)
                .with_context(|| "Failed to parse config.json")?;
            tracing::info!("Loaded configuration from {:?}", config_file);
            config
        } else {
            tracing::info!("No config file found at {:?}, using defaults", config_file);
            let config = Config::default();

            std::fs::create_dir_all(config_path)
                .with_context(|| format!("Failed to create config directory: {:?}", config_path))?;

            // Write default config for reference
            let content = serde_json::to_string_pretty(&config)?;
            std::fs::write(&config_file, content)
                .with_context(|| format!("Failed to write default config: {:?}", config_file))?;
            tracing::info!("Created default config at {:?}", config_file);

            config
        };

        if config.ledger_path.is_relative() {
            config.ledger_path = config_path.join(&config.ledger_path);
        }
        Ok(config)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}
