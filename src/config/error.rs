use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while building or loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("duplicate threshold must be in (0, 1], got {0}")]
    InvalidThreshold(f64),

    #[error("invalid weights: {0}")]
    InvalidWeights(String),

    #[error("unknown sort order: {0:?}")]
    UnknownSortOrder(String),

    #[error("unknown export format: {0:?}")]
    UnknownFormat(String),

    #[error("no configuration directory available on this system")]
    NoConfigDir,

    #[error("cannot access settings file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid settings file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
