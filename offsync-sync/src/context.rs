//! Shared handles for the orchestrator and the offline writer.

use crate::connectivity::Connectivity;
use crate::error::{SyncError, SyncResult};
use crate::remote::RemoteService;
use offsync_blobstore::{BlobCache, BlobCacheResult};
use offsync_storage::{LocalStore, StorageResult};
use std::sync::Arc;

/// Everything a sync component needs to reach local and remote state.
///
/// Store and cache calls are blocking SQLite work; [`with_store`] and
/// [`with_blobs`] move them onto the blocking pool.
///
/// [`with_store`]: SyncContext::with_store
/// [`with_blobs`]: SyncContext::with_blobs
#[derive(Clone)]
pub struct SyncContext {
    pub store: Arc<LocalStore>,
    pub blobs: Arc<BlobCache>,
    pub remote: Arc<dyn RemoteService>,
    pub connectivity: Arc<dyn Connectivity>,
}

impl SyncContext {
    pub fn new(
        store: Arc<LocalStore>,
        blobs: Arc<BlobCache>,
        remote: Arc<dyn RemoteService>,
        connectivity: Arc<dyn Connectivity>,
    ) -> Self {
        Self {
            store,
            blobs,
            remote,
            connectivity,
        }
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    /// Runs a store call on the blocking pool.
    pub async fn with_store<T, F>(&self, f: F) -> SyncResult<T>
    where
        F: FnOnce(&LocalStore) -> StorageResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| SyncError::Task(e.to_string()))?
            .map_err(SyncError::from)
    }

    /// Runs a blob cache call on the blocking pool.
    pub async fn with_blobs<T, F>(&self, f: F) -> SyncResult<T>
    where
        F: FnOnce(&BlobCache) -> BlobCacheResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let blobs = Arc::clone(&self.blobs);
        tokio::task::spawn_blocking(move || f(&blobs))
            .await
            .map_err(|e| SyncError::Task(e.to_string()))?
            .map_err(SyncError::from)
    }
}
