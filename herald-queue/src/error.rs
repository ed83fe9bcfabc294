//! Error types for the queue.

use std::{io, path::PathBuf};

use thiserror::Error;

use crate::MessageId;

#[derive(Debug, Error)]
pub enum QueueError {
    /// Reading or writing the snapshot failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The snapshot could not be encoded, or the file on disk is corrupt.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The message was rejected before being queued.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Message not found: {0}")]
    NotFound(MessageId),

    #[error("Invalid message id '{0}'")]
    InvalidId(String),

    /// Another process holds the snapshot.
    #[error("Queue at {} is in use by another process", .0.display())]
    Locked(PathBuf),

    /// The queue was opened for inspection only.
    #[error("Queue is open read-only")]
    ReadOnly,
}

pub type Result<T> = std::result::Result<T, QueueError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err = QueueError::from(io_err);

        assert!(matches!(err, QueueError::Io(_)));
        assert!(err.to_string().contains("access denied"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<Vec<u8>>("not json").unwrap_err();
        assert!(matches!(QueueError::from(json_err), QueueError::Serialization(_)));
    }
}
