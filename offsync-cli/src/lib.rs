//! Wiring for the `offsync` binary.
//!
//! Loads an [`AppConfig`] and assembles the store, blob cache, HTTP remote,
//! orchestrator and offline writer over one database file.

use anyhow::{Context, Result};
use offsync_blobstore::{BlobCache, BlobCacheConfig};
use offsync_storage::LocalStore;
use offsync_sync::{
    ConnectivityFlag, HttpRemote, OfflineWriter, RemoteConfig, SyncConfig, SyncContext,
    SyncOrchestrator,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Everything the binary can be configured with, read from a JSON file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub sync: SyncConfig,
    pub remote: RemoteConfig,
    pub blob_cache: BlobCacheConfig,
}

impl AppConfig {
    /// Reads a config file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config {}", path.display()))
    }

    /// Reads `path` if given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        path.map_or_else(|| Ok(Self::default()), Self::load)
    }
}

/// An opened store with sync components attached.
pub struct Engine {
    pub ctx: SyncContext,
    pub orchestrator: Arc<SyncOrchestrator>,
    pub writer: OfflineWriter,
    pub connectivity: Arc<ConnectivityFlag>,
}

impl Engine {
    /// Opens (or creates) the database at `db` and attaches an HTTP remote.
    pub fn open(db: &Path, config: &AppConfig) -> Result<Self> {
        let store = LocalStore::open(db)
            .with_context(|| format!("failed to open store {}", db.display()))?;
        let blobs = BlobCache::with_config(&store, config.blob_cache.clone());
        let remote =
            HttpRemote::new(config.remote.clone()).context("failed to build HTTP client")?;
        let connectivity = Arc::new(ConnectivityFlag::new(true));

        let ctx = SyncContext::new(
            Arc::new(store),
            Arc::new(blobs),
            Arc::new(remote),
            connectivity.clone(),
        );
        info!(
            "Opened {} against {}",
            db.display(),
            config.remote.base_url
        );
        Ok(Self {
            orchestrator: Arc::new(SyncOrchestrator::new(ctx.clone(), config.sync.clone())),
            writer: OfflineWriter::new(ctx.clone(), config.sync.clone()),
            ctx,
            connectivity,
        })
    }

    pub fn store(&self) -> &LocalStore {
        &self.ctx.store
    }

    pub fn blobs(&self) -> &BlobCache {
        &self.ctx.blobs
    }
}
