//! Error types and client-visible status codes.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Numeric status codes carried in per-stream results and remote errors.
///
/// Values follow the usual RPC status numbering so they survive a hop
/// between nodes unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum ErrorCode {
    Canceled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    Internal = 13,
    Unavailable = 14,
    BufferFull = 36,
}

impl ErrorCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Parse a numeric code. Unrecognized values map to `Unknown`.
    pub fn from_i32(code: i32) -> Self {
        match code {
            1 => ErrorCode::Canceled,
            3 => ErrorCode::InvalidArgument,
            4 => ErrorCode::DeadlineExceeded,
            5 => ErrorCode::NotFound,
            6 => ErrorCode::AlreadyExists,
            13 => ErrorCode::Internal,
            14 => ErrorCode::Unavailable,
            36 => ErrorCode::BufferFull,
            _ => ErrorCode::Unknown,
        }
    }

    /// Whether a failed add-stream attempt with this code is worth one
    /// retry against a different node.
    pub fn retry_on_other_node(self) -> bool {
        matches!(
            self,
            ErrorCode::NotFound | ErrorCode::DeadlineExceeded | ErrorCode::Internal
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Canceled => "CANCELED",
            ErrorCode::Unknown => "UNKNOWN",
            ErrorCode::InvalidArgument => "INVALID_ARGUMENT",
            ErrorCode::DeadlineExceeded => "DEADLINE_EXCEEDED",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::AlreadyExists => "ALREADY_EXISTS",
            ErrorCode::Internal => "INTERNAL",
            ErrorCode::Unavailable => "UNAVAILABLE",
            ErrorCode::BufferFull => "BUFFER_FULL",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced by the sync engine.
///
/// Cloneable so a single cancellation cause can be handed to every task
/// that observes it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Malformed, duplicate or overlapping request.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Unknown stream or session.
    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate session id, or the stream is already syncing.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// No candidate node, or a closed queue.
    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),

    #[error("canceled: {0}")]
    Canceled(String),

    /// A bounded queue hit its ceiling.
    #[error("buffer full")]
    BufferFull,

    #[error("internal error: {0}")]
    Internal(String),

    /// An error reported by a peer node.
    #[error("remote error ({code}): {message}")]
    Remote { code: ErrorCode, message: String },
}

impl SyncError {
    pub fn code(&self) -> ErrorCode {
        match self {
            SyncError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            SyncError::NotFound(_) => ErrorCode::NotFound,
            SyncError::AlreadyExists(_) => ErrorCode::AlreadyExists,
            SyncError::Unavailable(_) => ErrorCode::Unavailable,
            SyncError::DeadlineExceeded(_) => ErrorCode::DeadlineExceeded,
            SyncError::Canceled(_) => ErrorCode::Canceled,
            SyncError::BufferFull => ErrorCode::BufferFull,
            SyncError::Internal(_) => ErrorCode::Internal,
            SyncError::Remote { code, .. } => *code,
        }
    }

    /// The bare message, without the code prefix added by `Display`.
    pub fn message(&self) -> String {
        match self {
            SyncError::InvalidArgument(m)
            | SyncError::NotFound(m)
            | SyncError::AlreadyExists(m)
            | SyncError::Unavailable(m)
            | SyncError::DeadlineExceeded(m)
            | SyncError::Canceled(m)
            | SyncError::Internal(m) => m.clone(),
            SyncError::BufferFull => "buffer full".to_string(),
            SyncError::Remote { message, .. } => message.clone(),
        }
    }

    /// Rebuild an error from a code and message received over the wire.
    pub fn remote(code: ErrorCode, message: impl Into<String>) -> Self {
        SyncError::Remote {
            code,
            message: message.into(),
        }
    }

    /// Whether the error points at the connection rather than the request.
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self.code(),
            ErrorCode::Unavailable | ErrorCode::DeadlineExceeded
        )
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_numbering() {
        assert_eq!(ErrorCode::NotFound.as_i32(), 5);
        assert_eq!(ErrorCode::Unavailable.as_i32(), 14);
        assert_eq!(ErrorCode::from_i32(6), ErrorCode::AlreadyExists);
        assert_eq!(ErrorCode::from_i32(999), ErrorCode::Unknown);
    }

    #[test]
    fn test_retry_subset() {
        assert!(ErrorCode::NotFound.retry_on_other_node());
        assert!(ErrorCode::DeadlineExceeded.retry_on_other_node());
        assert!(ErrorCode::Internal.retry_on_other_node());
        assert!(!ErrorCode::Unavailable.retry_on_other_node());
        assert!(!ErrorCode::AlreadyExists.retry_on_other_node());
    }

    #[test]
    fn test_remote_error_keeps_code() {
        let err = SyncError::remote(ErrorCode::NotFound, "stream missing");
        assert_eq!(err.code(), ErrorCode::NotFound);
        assert_eq!(err.message(), "stream missing");
        assert_eq!(err.to_string(), "remote error (NOT_FOUND): stream missing");
    }
}
