//! Error types for the encrypted store.

use thiserror::Error;

/// Errors from durable-state I/O.
///
/// A failed operation never leaves a partial state transition behind:
/// multi-row changes run inside one transaction.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Database error from `SQLite`.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The connection lock was poisoned by a panicking writer.
    #[error("Failed to acquire database lock: {0}")]
    Lock(String),

    /// The data directory could not be prepared.
    #[error("I/O error: {0}")]
    Io(String),

    /// The storage key does not open this database.
    #[error("Storage key rejected")]
    KeyRejected,

    /// A stored row could not be decoded.
    #[error("Invalid stored data: {0}")]
    InvalidData(String),

    /// A required row is missing.
    #[error("Not found: {0}")]
    NotFound(String),
}

/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
