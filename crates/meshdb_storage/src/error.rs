//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in the key-value engine.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The commit log contains a record that fails validation.
    #[error("commit log corrupted at offset {offset}: {message}")]
    Corrupted {
        /// Byte offset of the offending frame.
        offset: u64,
        /// Description of the corruption.
        message: String,
    },

    /// Another process holds the database directory.
    #[error("storage locked: another process has exclusive access")]
    Locked,

    /// The engine has been closed.
    #[error("storage is closed")]
    Closed,

    /// A failed write could not be rolled back, so the commit log no longer
    /// matches the engine's state. The engine must be reopened.
    #[error("storage is poisoned: a failed commit could not be rolled back")]
    Poisoned,
}

impl StorageError {
    /// Creates a corruption error for the frame at `offset`.
    pub fn corrupted(offset: u64, message: impl Into<String>) -> Self {
        Self::Corrupted {
            offset,
            message: message.into(),
        }
    }
}
