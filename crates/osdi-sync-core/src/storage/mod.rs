mod config;
pub mod database;
pub mod migrations;
pub mod settings;

pub use config::{BatchConfig, Config, LoggingConfig, QueueConfig, RemoteConfig, SyncConfig};
pub use database::Database;
pub use settings::{HorizonMark, LockName, ProcessLock, Settings};

use chrono::{DateTime, SecondsFormat, Utc};
use std::path::PathBuf;

use crate::error::ConfigError;

/// Returns `$OSDI_SYNC_HOME`, or `~/.config/osdi-sync/` when unset.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let dir = match std::env::var_os("OSDI_SYNC_HOME") {
        Some(home) => PathBuf::from(home),
        None => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("osdi-sync"),
    };

    std::fs::create_dir_all(&dir).map_err(|e| ConfigError::DataDir(format!("{}: {e}", dir.display())))?;
    Ok(dir)
}

/// Fixed-width UTC timestamp so stored values sort lexicographically.
pub fn format_ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_ts(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
