//! Error types for the server as a whole.

use crate::protocol::SnapshotError;
use thiserror::Error;

/// Result type alias using ServerError
pub type Result<T> = std::result::Result<T, ServerError>;

/// Errors that stop the server from starting or running.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("Invalid listen address: {0}")]
    InvalidAddress(String),
}
