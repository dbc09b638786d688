//! Errors raised on the replication path.

use thiserror::Error;
use tidewater_core::DomainError;

/// Errors from the change stream, the checkpoint file and the reader task.
#[derive(Debug, Error)]
pub enum CdcError {
    /// Neither a checkpoint nor a configured starting offset exists.
    #[error("no checkpoint found and no starting offset configured")]
    NoStartingOffset,

    /// An offset string could not be parsed.
    #[error("invalid offset {0:?}")]
    InvalidOffset(String),

    /// Reading or writing the checkpoint file failed.
    #[error("checkpoint file error: {0}")]
    Checkpoint(#[from] std::io::Error),

    /// The change stream could not be established.
    #[error("failed to connect to change stream: {0}")]
    Connect(String),

    /// The change stream failed after it was established.
    #[error("change stream failed: {0}")]
    Stream(String),

    /// A change record did not have the expected shape.
    #[error("failed to decode change record: {0}")]
    Decode(String),

    /// A domain error surfaced on the replication path.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// A background task panicked or was cancelled.
    #[error("background task failed: {0}")]
    TaskJoin(String),
}

impl From<tokio::task::JoinError> for CdcError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::TaskJoin(e.to_string())
    }
}
