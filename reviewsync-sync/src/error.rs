//! Error types for reviewsync-sync.

use std::path::PathBuf;

use thiserror::Error;

use reviewsync_core::DecodeError;

/// Failure of a single remote store call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// Network failure, timeout, or a 5xx. Polls retry on the next tick.
    #[error("transport error: {0}")]
    Transport(String),

    /// The store refused the request (validation or conflict, 4xx).
    #[error("remote rejected request ({status}): {message}")]
    Rejected {
        status: u16,
        kind: Option<String>,
        message: String,
    },

    /// The call was abandoned before it produced a result.
    #[error("request cancelled")]
    Cancelled,

    /// The store answered with a payload that does not decode.
    #[error("undecodable response: {0}")]
    Decode(String),
}

impl From<DecodeError> for RemoteError {
    fn from(err: DecodeError) -> Self {
        RemoteError::Decode(err.to_string())
    }
}

/// All errors that can arise from engine operations.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error (state file).
    #[error("state file JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
