//! Error types for reviewsync-core.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can arise while loading or saving the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure, with the path involved.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML serialization error (save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load, with file path and line context from serde_yaml.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None`, so `~/.reviewsync/` cannot be located.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// The config file did not exist at the expected path.
    #[error("config not found at {path}; run `reviewsync init` first")]
    NotFound { path: PathBuf },

    /// The config parsed but carries values the engine cannot run with.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Errors from decoding a raw remote payload into a [`crate::Record`].
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("record payload has no id")]
    MissingId,

    #[error("expected a JSON object for {what}")]
    NotAnObject { what: &'static str },

    #[error("record {id} has an invalid createdTime: {source}")]
    Timestamp {
        id: String,
        #[source]
        source: chrono::ParseError,
    },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.into(),
        source,
    }
}
