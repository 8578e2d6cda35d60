//! Sync metadata, the active pull scope, and store statistics.

use crate::error::StorageResult;
use offsync_types::{EntityKind, Millis, now_millis};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};

/// Last known sync point of one remote entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMetadata {
    pub entity_kind: String,
    pub entity_id: String,
    pub last_synced_at: Millis,
    pub version: u64,
    pub checksum: Option<String>,
}

/// What the pull step fetches: `GET /{path}/{kind}` for each kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncScope {
    /// Path prefix identifying the working set, e.g. `vessels/v-17`.
    pub path: String,
    pub kinds: Vec<EntityKind>,
}

impl SyncScope {
    pub fn new(path: impl Into<String>, kinds: Vec<EntityKind>) -> Self {
        Self {
            path: path.into().trim_matches('/').to_string(),
            kinds,
        }
    }
}

/// Counters for a sync summary screen.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_entities: usize,
    pub pending_operations: usize,
    pub last_synced_at: Option<Millis>,
}

pub(crate) fn upsert(
    conn: &Connection,
    kind: &str,
    id: &str,
    version: u64,
    checksum: Option<&str>,
) -> StorageResult<SyncMetadata> {
    let meta = SyncMetadata {
        entity_kind: kind.to_string(),
        entity_id: id.to_string(),
        last_synced_at: now_millis(),
        version,
        checksum: checksum.map(str::to_string),
    };
    conn.execute(
        "INSERT OR REPLACE INTO sync_metadata (entity_kind, entity_id, last_synced_at, version, checksum)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            meta.entity_kind,
            meta.entity_id,
            meta.last_synced_at,
            meta.version as i64,
            meta.checksum,
        ],
    )?;
    Ok(meta)
}

pub(crate) fn get(conn: &Connection, kind: &str, id: &str) -> StorageResult<Option<SyncMetadata>> {
    let meta = conn
        .query_row(
            "SELECT entity_kind, entity_id, last_synced_at, version, checksum
             FROM sync_metadata WHERE entity_kind = ?1 AND entity_id = ?2",
            params![kind, id],
            |row| {
                Ok(SyncMetadata {
                    entity_kind: row.get(0)?,
                    entity_id: row.get(1)?,
                    last_synced_at: row.get(2)?,
                    version: row.get::<_, i64>(3)? as u64,
                    checksum: row.get(4)?,
                })
            },
        )
        .optional()?;
    Ok(meta)
}

pub(crate) fn delete(conn: &Connection, kind: &str, id: &str) -> StorageResult<bool> {
    let n = conn.execute(
        "DELETE FROM sync_metadata WHERE entity_kind = ?1 AND entity_id = ?2",
        params![kind, id],
    )?;
    Ok(n > 0)
}

pub(crate) fn latest_sync(conn: &Connection) -> StorageResult<Option<Millis>> {
    let latest: Option<Millis> =
        conn.query_row("SELECT MAX(last_synced_at) FROM sync_metadata", [], |row| row.get(0))?;
    Ok(latest)
}

const ACTIVE_SCOPE_KEY: &str = "active_scope";

pub(crate) fn set_scope(conn: &Connection, scope: Option<&SyncScope>) -> StorageResult<()> {
    match scope {
        Some(scope) => {
            conn.execute(
                "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
                params![ACTIVE_SCOPE_KEY, serde_json::to_string(scope)?],
            )?;
        }
        None => {
            conn.execute("DELETE FROM settings WHERE key = ?1", params![ACTIVE_SCOPE_KEY])?;
        }
    }
    Ok(())
}

pub(crate) fn get_scope(conn: &Connection) -> StorageResult<Option<SyncScope>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value FROM settings WHERE key = ?1",
            params![ACTIVE_SCOPE_KEY],
            |row| row.get(0),
        )
        .optional()?;
    Ok(raw.map(|s| serde_json::from_str(&s)).transpose()?)
}
