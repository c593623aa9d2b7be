//! Error types for the store module.

use streamsync_core::{StreamId, SyncError};
use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The stream is not known to this node.
    #[error("stream not found: {0}")]
    StreamNotFound(StreamId),

    /// The stream exists but cannot serve reads right now.
    #[error("stream {stream_id} unavailable: {reason}")]
    Unavailable { stream_id: StreamId, reason: String },
}

impl From<StoreError> for SyncError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::StreamNotFound(_) => SyncError::NotFound(e.to_string()),
            StoreError::Unavailable { .. } => SyncError::Unavailable(e.to_string()),
        }
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
