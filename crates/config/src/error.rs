//! Configuration errors.

use std::path::PathBuf;
use thiserror::Error;

/// Result alias for [`ConfigError`].
pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{file}': {source}")]
    Read { file: PathBuf, source: std::io::Error },

    #[error("Failed to parse config file '{file}': {source}")]
    Parse { file: PathBuf, source: serde_yaml::Error },

    #[error("Failed to serialize config: {0}")]
    Serialize(serde_yaml::Error),

    #[error("Failed to write config file '{file}': {message}")]
    Write { file: PathBuf, message: String },

    #[error("No wallet key found in ${0} or {1}")]
    MissingKey(&'static str, PathBuf),

    #[error("Invalid wallet key: {0}")]
    InvalidKey(String),
}
