use thiserror::Error;

/// Result type for blob cache operations.
pub type BlobCacheResult<T> = Result<T, BlobCacheError>;

/// Errors that can occur in blob cache operations.
#[derive(Debug, Error)]
pub enum BlobCacheError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("storage error: {0}")]
    Storage(#[from] offsync_storage::StorageError),

    #[error("connection lock poisoned")]
    LockPoisoned,
}
