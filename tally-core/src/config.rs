//! Configuration management
//!
//! Settings live in `settings.json` inside the tally directory:
//! ```json
//! {
//!   "database": { "file": "tally.duckdb" },
//!   "transfer": { "timeoutMs": 5000 },
//!   "retry": { "maxAttempts": 5, "initialDelayMs": 10, "maxDelayMs": 500 },
//!   "logging": { "level": "info", "json": false }
//! }
//! ```
//! Unknown keys are kept when the file is saved again.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};

use crate::services::RetryPolicy;

pub const SETTINGS_FILE: &str = "settings.json";

/// Overrides `logging.level`
pub const ENV_LOG: &str = "TALLY_LOG";

/// Overrides `transfer.timeoutMs`
pub const ENV_TRANSFER_TIMEOUT_MS: &str = "TALLY_TRANSFER_TIMEOUT_MS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSettings {
    /// File name relative to the tally directory
    #[serde(default = "default_db_file")]
    pub file: String,
}

fn default_db_file() -> String {
    "tally.duckdb".to_string()
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            file: default_db_file(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferSettings {
    /// Deadline for one transfer call; none when absent or zero
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay_ms() -> u64 {
    10
}

fn default_max_delay_ms() -> u64 {
    500
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingSettings {
    /// `EnvFilter` directive, e.g. `info` or `tally_core=debug`
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Raw settings.json structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsFile {
    #[serde(default)]
    database: DatabaseSettings,
    #[serde(default)]
    transfer: TransferSettings,
    #[serde(default)]
    retry: RetrySettings,
    #[serde(default)]
    logging: LoggingSettings,
    #[serde(flatten)]
    other: HashMap<String, serde_json::Value>,
}

/// Tally configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub database: DatabaseSettings,
    pub transfer: TransferSettings,
    pub retry: RetrySettings,
    pub logging: LoggingSettings,
    // Keys this version does not manage, written back on save
    other: HashMap<String, serde_json::Value>,
}

impl Config {
    /// Load config from the tally directory, then apply environment overrides
    pub fn load(tally_dir: &Path) -> Result<Self> {
        let mut config = Self::load_file(tally_dir)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load `settings.json` only. A missing file yields the defaults.
    pub fn load_file(tally_dir: &Path) -> Result<Self> {
        let settings_path = tally_dir.join(SETTINGS_FILE);
        let raw: SettingsFile = if settings_path.exists() {
            let content = std::fs::read_to_string(&settings_path)?;
            serde_json::from_str(&content)
                .with_context(|| format!("Invalid {}", settings_path.display()))?
        } else {
            SettingsFile::default()
        };

        Ok(Self {
            database: raw.database,
            transfer: raw.transfer,
            retry: raw.retry,
            logging: raw.logging,
            other: raw.other,
        })
    }

    /// Apply `TALLY_LOG` and `TALLY_TRANSFER_TIMEOUT_MS` from `lookup`
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(level) = lookup(ENV_LOG).filter(|l| !l.trim().is_empty()) {
            self.logging.level = level;
        }
        if let Some(raw) = lookup(ENV_TRANSFER_TIMEOUT_MS) {
            match raw.trim().parse::<u64>() {
                Ok(ms) => self.transfer.timeout_ms = Some(ms),
                Err(_) => tracing::warn!(
                    "ignoring {}={:?}: not a number of milliseconds",
                    ENV_TRANSFER_TIMEOUT_MS,
                    raw
                ),
            }
        }
    }

    /// Save config to the tally directory
    pub fn save(&self, tally_dir: &Path) -> Result<()> {
        let settings = SettingsFile {
            database: self.database.clone(),
            transfer: self.transfer.clone(),
            retry: self.retry.clone(),
            logging: self.logging.clone(),
            other: self.other.clone(),
        };
        let content = serde_json::to_string_pretty(&settings)?;
        std::fs::write(tally_dir.join(SETTINGS_FILE), content)?;
        Ok(())
    }

    pub fn transfer_timeout(&self) -> Option<Duration> {
        match self.transfer.timeout_ms {
            Some(0) | None => None,
            Some(ms) => Some(Duration::from_millis(ms)),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts.max(1),
            initial_delay: Duration::from_millis(self.retry.initial_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
        }
    }
}
