//! Error types for the sync layer.

use crate::report::SyncReport;
use offsync_blobstore::BlobCacheError;
use offsync_storage::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Transport failure, timeout, 5xx, 408 or 429. Retried.
    #[error("network error: {0}")]
    Network(String),

    /// The remote rejected the request outright (4xx). Not retried.
    #[error("remote rejected request ({status}): {message}")]
    Validation { status: u16, message: String },

    /// The remote answered with a body we could not interpret. Retried.
    #[error("invalid remote response: {0}")]
    InvalidResponse(String),

    /// A request could not be built from the queued payload. Not retried.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A queued upload whose bytes are no longer in the blob cache.
    #[error("cached blob missing for {0}")]
    MissingBlob(String),

    /// A local record the caller referred to does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Local store failure.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Blob cache failure.
    #[error("blob cache error: {0}")]
    BlobCache(#[from] BlobCacheError),

    /// A blocking store task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Task(String),

    /// A fatal local error stopped the cycle. `report` holds what completed
    /// before it.
    #[error("sync cycle aborted: {source}")]
    CycleAborted {
        report: Box<SyncReport>,
        #[source]
        source: Box<SyncError>,
    },
}

impl SyncError {
    /// Whether a queued operation that failed with this error stays queued.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Network(_) | SyncError::InvalidResponse(_))
    }

    /// Whether this error stops the whole cycle instead of one item.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::Storage(_)
                | SyncError::BlobCache(_)
                | SyncError::Task(_)
                | SyncError::CycleAborted { .. }
        )
    }

    /// HTTP status of a rejected request.
    pub fn status(&self) -> Option<u16> {
        match self {
            SyncError::Validation { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub(crate) fn aborted(report: SyncReport, source: SyncError) -> Self {
        SyncError::CycleAborted {
            report: Box::new(report),
            source: Box::new(source),
        }
    }
}

impl From<offsync_types::Error> for SyncError {
    fn from(err: offsync_types::Error) -> Self {
        SyncError::InvalidResponse(err.to_string())
    }
}
