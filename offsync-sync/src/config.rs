//! Engine and remote configuration.

use crate::conflict::ConflictStrategy;
use offsync_storage::DEFAULT_MAX_RETRIES;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the sync orchestrator and offline writer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Interval between auto-sync cycles (in seconds).
    pub auto_sync_interval_secs: u64,
    /// Retry ceiling for newly queued operations.
    pub default_max_retries: u32,
    /// Probe the remote health endpoint before each cycle.
    pub check_health: bool,
    /// How long cached document bytes are kept (in seconds).
    pub document_ttl_secs: u64,
    /// Conflict strategy in effect until changed at runtime.
    pub strategy: ConflictStrategy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            auto_sync_interval_secs: 30,
            default_max_retries: DEFAULT_MAX_RETRIES,
            check_health: true,
            document_ttl_secs: 7 * 24 * 60 * 60, // 7 days
            strategy: ConflictStrategy::default(),
        }
    }
}

impl SyncConfig {
    pub fn auto_sync_interval(&self) -> Duration {
        Duration::from_secs(self.auto_sync_interval_secs.max(1))
    }

    pub fn document_ttl(&self) -> chrono::Duration {
        i64::try_from(self.document_ttl_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }
}

/// Configuration for [`HttpRemote`](crate::HttpRemote).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL every resource path is appended to, e.g. `https://api.example.com/api`.
    pub base_url: String,
    /// Timeout for regular requests (in seconds).
    pub timeout_secs: u64,
    /// Timeout for the health probe (in seconds).
    pub health_timeout_secs: u64,
    /// Bearer token sent with every request.
    pub auth_token: Option<String>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000/api".to_string(),
            timeout_secs: 30,
            health_timeout_secs: 5,
            auth_token: None,
        }
    }
}
