//! Configuration module
//!
//! Handles application settings loaded from TOML or JSON files

mod settings;

pub use settings::{AppConfig, LogFormat, LoggingConfig, PortConfig};

use directories::ProjectDirs;
use std::path::PathBuf;
use thiserror::Error;

/// Default configuration file name
pub const CONFIG_FILE_NAME: &str = "thpoll.toml";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// File could not be read
    #[error("cannot read config {}: {source}", path.display())]
    Read {
        /// File path
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// File could not be written
    #[error("cannot write config {}: {source}", path.display())]
    Write {
        /// File path
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// File content is malformed
    #[error("invalid config {}: {message}", path.display())]
    Parse {
        /// File path
        path: PathBuf,
        /// Parser message
        message: String,
    },

    /// Config could not be encoded
    #[error("cannot serialize config: {0}")]
    Serialize(String),

    /// Config is well-formed but unusable
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Get the application configuration directory
pub fn config_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "thpoll", "thpoll").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the application data directory
pub fn data_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "thpoll", "thpoll").map(|dirs| dirs.data_dir().to_path_buf())
}

/// Get the log directory
pub fn log_dir() -> Option<PathBuf> {
    data_dir().map(|d| d.join("logs"))
}

/// Locate the config file when none is given
///
/// `thpoll.toml` in the working directory wins over the platform config dir.
pub fn default_config_path() -> PathBuf {
    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.exists() {
        return local;
    }
    config_dir()
        .map(|d| d.join(CONFIG_FILE_NAME))
        .filter(|p| p.exists())
        .unwrap_or(local)
}
