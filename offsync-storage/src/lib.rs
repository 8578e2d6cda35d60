//! SQLite storage layer for offsync.
//!
//! Provides the durable local side of the engine:
//!
//! - Generic keyed records per entity kind (`entities:{kind}`)
//! - Per-entity [`SyncMetadata`] keyed by `(kind, id)`
//! - The ordered [`QueuedOperation`] log awaiting transmission
//! - The `blob_cache` table used by `offsync-blobstore`
//!
//! Single-key reads and writes are atomic on their own. Multi-record writes
//! go through [`LocalStore::transaction`], which commits everything or nothing.
//!
//! The connection is shared behind `Arc<Mutex<_>>` so the blob cache can sit
//! on the same database file.

mod action;
mod error;
mod metadata;
mod queue;
mod schema;
mod store;
mod transaction;

pub use action::{DocumentUpload, SyncAction};
pub use error::{StorageError, StorageResult};
pub use metadata::{StoreStats, SyncMetadata, SyncScope};
pub use queue::{DEFAULT_MAX_RETRIES, QueuedOperation};
pub use store::LocalStore;
pub use transaction::StoreTransaction;

/// Open a SQLite connection tuned for durability.
///
/// Enables WAL journaling with `synchronous=FULL` so a committed write
/// survives a crash, then runs `PRAGMA quick_check`. A database that fails the
/// check is reported as [`StorageError::Corrupted`] rather than opened.
pub fn open_durable_connection(path: &std::path::Path) -> StorageResult<rusqlite::Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let conn = rusqlite::Connection::open(path)?;
    conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))?;
    conn.execute_batch("PRAGMA synchronous=FULL;")?;

    let check: String = conn.query_row("PRAGMA quick_check", [], |row| row.get(0))?;
    if check != "ok" {
        return Err(StorageError::Corrupted(check));
    }
    Ok(conn)
}
