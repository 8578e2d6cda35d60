//! Table layout.

use crate::error::StorageResult;
use rusqlite::Connection;

/// Every table owned by the store, in wipe order.
pub(crate) const TABLES: &[&str] = &[
    "entities",
    "sync_metadata",
    "operation_queue",
    "blob_cache",
    "settings",
];

pub(crate) fn init(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS entities (
            kind TEXT NOT NULL,
            id TEXT NOT NULL,
            data TEXT NOT NULL,
            PRIMARY KEY (kind, id)
        );

        CREATE TABLE IF NOT EXISTS sync_metadata (
            entity_kind TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            last_synced_at INTEGER NOT NULL,
            version INTEGER NOT NULL,
            checksum TEXT,
            PRIMARY KEY (entity_kind, entity_id)
        );

        CREATE TABLE IF NOT EXISTS operation_queue (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            entity_kind TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            action TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            retry_count INTEGER NOT NULL DEFAULT 0,
            max_retries INTEGER NOT NULL,
            CHECK (retry_count <= max_retries)
        );
        CREATE INDEX IF NOT EXISTS idx_queue_entity ON operation_queue (entity_kind, entity_id);

        CREATE TABLE IF NOT EXISTS blob_cache (
            id TEXT PRIMARY KEY,
            source_key TEXT NOT NULL,
            bytes BLOB NOT NULL,
            mime_type TEXT NOT NULL,
            size INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            last_accessed_at INTEGER NOT NULL,
            expires_at INTEGER,
            pinned INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_blob_expires ON blob_cache (expires_at);

        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        ",
    )?;
    Ok(())
}
