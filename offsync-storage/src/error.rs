//! Error types for the storage layer.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database error from SQLite (includes "database or disk is full").
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Record not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// IO error (file system).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The database failed its integrity check on open.
    #[error("database corrupted: {0}")]
    Corrupted(String),

    /// Invalid data read back from the database.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// A thread panicked while holding the connection lock.
    #[error("connection lock poisoned")]
    LockPoisoned,
}

impl StorageError {
    /// Returns true when SQLite reported the disk or quota as full.
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(
            self,
            StorageError::Database(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::DiskFull
        )
    }
}
