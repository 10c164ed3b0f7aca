//! Centralized path utilities
//!
//! All application paths in one place for consistency

use std::path::PathBuf;

use crate::constants::dirs as names;

/// Get the strand config directory (~/.strand)
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(names::CONFIG_DIR_NAME)
}

/// Get the config file path (~/.strand/config.toml)
pub fn config_file() -> PathBuf {
    config_dir().join(names::CONFIG_FILE_NAME)
}

/// Get the logs directory (~/.strand/logs)
pub fn logs_dir() -> PathBuf {
    config_dir().join("logs")
}

/// Get the default database path (~/.strand/strand.db)
pub fn database_path() -> PathBuf {
    config_dir().join(names::DATABASE_FILE_NAME)
}

/// Ensure the logs directory exists, creating it if necessary
pub fn ensure_logs_dir() -> std::io::Result<PathBuf> {
    let dir = logs_dir();
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
