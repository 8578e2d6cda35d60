//! Offline-first sync engine for offsync.
//!
//! Writes made while offline are stored locally and appended to a durable
//! queue. When connectivity returns, the [`SyncOrchestrator`] replays the
//! queue against the remote authority in insertion order, then refreshes the
//! active scope from the remote and sweeps expired blobs.
//!
//! ## Components
//!
//! - **Remote**: [`RemoteService`] contract, with [`HttpRemote`] for REST and
//!   [`remote::mock::MockRemote`] for tests
//! - **Conflict**: [`resolve`] computes the payload for a queued update under
//!   the active [`ConflictStrategy`]
//! - **Orchestrator**: one cycle at a time, per-operation outcomes in a
//!   [`SyncReport`], optional auto-sync timer
//! - **Writer**: [`OfflineWriter`] writes through when it can and queues
//!   when it cannot
//!
//! ## Failure classification
//!
//! Network errors, timeouts, 5xx, 408 and 429 keep an operation queued until
//! its retry ceiling. Any other 4xx, or a missing cached blob, drops it at
//! once. A local storage failure aborts the cycle.
//!
//! # Example
//!
//! ```no_run
//! use offsync_blobstore::BlobCache;
//! use offsync_storage::LocalStore;
//! use offsync_sync::{
//!     ConnectivityFlag, HttpRemote, RemoteConfig, SyncConfig, SyncContext, SyncOrchestrator,
//! };
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let store = LocalStore::open("offsync.db")?;
//! let blobs = BlobCache::new(&store);
//! let remote = HttpRemote::new(RemoteConfig::default())?;
//! let ctx = SyncContext::new(
//!     Arc::new(store),
//!     Arc::new(blobs),
//!     Arc::new(remote),
//!     Arc::new(ConnectivityFlag::default()),
//! );
//!
//! let orchestrator = SyncOrchestrator::new(ctx, SyncConfig::default());
//! let report = orchestrator.sync_all().await?;
//! println!("{report}");
//! # Ok(())
//! # }
//! ```

mod config;
pub mod conflict;
mod connectivity;
mod context;
mod error;
mod http;
mod orchestrator;
mod pull;
pub mod remote;
mod report;
mod writer;

pub use config::{RemoteConfig, SyncConfig};
pub use conflict::{
    ConflictInput, ConflictResolution, ConflictStrategy, ManualResolver, Resolved, resolve,
};
pub use connectivity::{Connectivity, ConnectivityFlag};
pub use context::SyncContext;
pub use error::{SyncError, SyncResult};
pub use http::HttpRemote;
pub use orchestrator::{SyncOrchestrator, SyncStatus};
pub use remote::{RemoteService, UploadRequest, UploadedDocument};
pub use report::{
    FailureDisposition, PullSummary, SkipReason, SyncFailure, SyncReport, SyncSuccess,
};
pub use writer::{NewDocument, OfflineWriter, WriteOutcome};
