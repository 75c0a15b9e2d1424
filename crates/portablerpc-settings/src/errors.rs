//! Why a settings layer could not be applied.

use std::path::PathBuf;

use thiserror::Error;

/// A settings layer that was rejected.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Read {
        /// File that was being loaded.
        path: PathBuf,
        /// Underlying I/O failure.
        source: std::io::Error,
    },
    /// The settings file is not a JSON document.
    #[error("{} is not valid JSON: {source}", path.display())]
    Malformed {
        /// File that was being loaded.
        path: PathBuf,
        /// Parser failure, with line and column.
        source: serde_json::Error,
    },
    /// The merged document does not fit [`RpcSettings`](crate::RpcSettings),
    /// e.g. a string where a number belongs.
    #[error("settings have the wrong shape: {0}")]
    Shape(#[from] serde_json::Error),
    /// A `PORTABLERPC_*` variable holds a value outside its accepted range.
    #[error("{key}={value:?} rejected, expected {expected}")]
    Override {
        /// Environment variable name.
        key: &'static str,
        /// Raw value as found in the environment.
        value: String,
        /// Human-readable description of accepted values.
        expected: &'static str,
    },
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
