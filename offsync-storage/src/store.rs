//! The local store.

use crate::action::SyncAction;
use crate::error::{StorageError, StorageResult};
use crate::metadata::{self, StoreStats, SyncMetadata, SyncScope};
use crate::queue::{self, DEFAULT_MAX_RETRIES, QueuedOperation};
use crate::schema;
use crate::transaction::StoreTransaction;
use offsync_types::{Entity, OperationId};
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

/// Durable keyed storage for entities, sync metadata and the operation queue.
pub struct LocalStore {
    conn: Arc<Mutex<Connection>>,
}

impl LocalStore {
    /// Opens (or creates) a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        let conn = crate::open_durable_connection(path)?;
        info!("Opened local store at {}", path.display());
        Self::from_connection(conn)
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StorageResult<Self> {
        schema::init(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// The shared connection, for components layered on the same database.
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }

    // ── Generic records ──────────────────────────────────────────

    /// Inserts or replaces a record.
    pub fn put(&self, kind: &str, id: &str, value: &Value) -> StorageResult<()> {
        let conn = self.lock()?;
        put_row(&conn, kind, id, value)
    }

    /// Reads a record.
    pub fn get(&self, kind: &str, id: &str) -> StorageResult<Option<Value>> {
        let conn = self.lock()?;
        get_row(&conn, kind, id)
    }

    /// Deletes a record. Returns whether it existed.
    pub fn delete(&self, kind: &str, id: &str) -> StorageResult<bool> {
        let conn = self.lock()?;
        delete_row(&conn, kind, id)
    }

    /// All records of a kind matching `predicate`, ordered by id.
    pub fn query<F>(&self, kind: &str, predicate: F) -> StorageResult<Vec<Value>>
    where
        F: Fn(&Value) -> bool,
    {
        let conn = self.lock()?;
        Ok(list_rows(&conn, kind)?
            .into_iter()
            .filter(|v| predicate(v))
            .collect())
    }

    /// All records of a kind, ordered by id.
    pub fn list(&self, kind: &str) -> StorageResult<Vec<Value>> {
        let conn = self.lock()?;
        list_rows(&conn, kind)
    }

    /// Ids of every record of a kind.
    pub fn list_ids(&self, kind: &str) -> StorageResult<Vec<String>> {
        let conn = self.lock()?;
        list_ids(&conn, kind)
    }

    /// Number of records of a kind.
    pub fn count(&self, kind: &str) -> StorageResult<usize> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM entities WHERE kind = ?1",
            params![kind],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    /// Stores an [`Entity`] under its own id.
    pub fn put_entity(&self, kind: &str, entity: &Entity) -> StorageResult<()> {
        self.put(kind, &entity.id, &entity.to_value())
    }

    /// Reads a record back as an [`Entity`].
    pub fn get_entity(&self, kind: &str, id: &str) -> StorageResult<Option<Entity>> {
        self.get(kind, id)?.map(decode_entity).transpose()
    }

    /// Every record of a kind parsed as an [`Entity`], ordered by id.
    pub fn list_entities(&self, kind: &str) -> StorageResult<Vec<Entity>> {
        self.list(kind)?.into_iter().map(decode_entity).collect()
    }

    /// Runs `f` inside a transaction. Every write made through the handle is
    /// committed if `f` returns `Ok`, and rolled back otherwise.
    pub fn transaction<T, F>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&StoreTransaction<'_>) -> StorageResult<T>,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let value = f(&StoreTransaction::new(&tx))?;
        tx.commit()?;
        Ok(value)
    }

    // ── Operation queue ──────────────────────────────────────────

    /// Appends an action with the default retry ceiling.
    pub fn enqueue(&self, action: SyncAction) -> StorageResult<OperationId> {
        self.enqueue_with_retries(action, DEFAULT_MAX_RETRIES)
    }

    /// Appends an action with an explicit retry ceiling.
    pub fn enqueue_with_retries(
        &self,
        action: SyncAction,
        max_retries: u32,
    ) -> StorageResult<OperationId> {
        let conn = self.lock()?;
        let op = queue::enqueue(&conn, OperationId::new(), action, max_retries)?;
        debug!("Queued {} as {}", op.action, op.id);
        Ok(op.id)
    }

    /// Pending operations in insertion order.
    pub fn list_pending(&self) -> StorageResult<Vec<QueuedOperation>> {
        let conn = self.lock()?;
        queue::list_pending(&conn)
    }

    /// Reads one queued operation.
    pub fn get_operation(&self, id: &OperationId) -> StorageResult<Option<QueuedOperation>> {
        let conn = self.lock()?;
        queue::get(&conn, id)
    }

    /// Increments an operation's retry count (never past its ceiling) and
    /// returns the updated entry, or `None` if it is no longer queued.
    pub fn record_failure(&self, id: &OperationId) -> StorageResult<Option<QueuedOperation>> {
        let conn = self.lock()?;
        queue::record_failure(&conn, id)
    }

    /// Removes an operation. Returns whether it was queued.
    pub fn remove_operation(&self, id: &OperationId) -> StorageResult<bool> {
        let conn = self.lock()?;
        queue::remove(&conn, id)
    }

    /// Number of queued operations.
    pub fn pending_count(&self) -> StorageResult<usize> {
        let conn = self.lock()?;
        queue::count(&conn)
    }

    /// Ids of entities of `kind` with at least one queued operation.
    pub fn pending_entity_ids(&self, kind: &str) -> StorageResult<HashSet<String>> {
        let conn = self.lock()?;
        queue::pending_entity_ids(&conn, kind)
    }

    // ── Sync metadata ────────────────────────────────────────────

    /// Records a successful push or pull of an entity.
    pub fn update_sync_metadata(
        &self,
        kind: &str,
        id: &str,
        version: u64,
        checksum: Option<&str>,
    ) -> StorageResult<SyncMetadata> {
        let conn = self.lock()?;
        metadata::upsert(&conn, kind, id, version, checksum)
    }

    /// Reads an entity's sync metadata.
    pub fn sync_metadata(&self, kind: &str, id: &str) -> StorageResult<Option<SyncMetadata>> {
        let conn = self.lock()?;
        metadata::get(&conn, kind, id)
    }

    /// Deletes an entity's sync metadata.
    pub fn delete_sync_metadata(&self, kind: &str, id: &str) -> StorageResult<bool> {
        let conn = self.lock()?;
        metadata::delete(&conn, kind, id)
    }

    // ── Pull scope ───────────────────────────────────────────────

    /// Sets (or clears) the scope the pull step fetches.
    pub fn set_active_scope(&self, scope: Option<&SyncScope>) -> StorageResult<()> {
        let conn = self.lock()?;
        metadata::set_scope(&conn, scope)
    }

    /// The scope the pull step fetches, if any.
    pub fn active_scope(&self) -> StorageResult<Option<SyncScope>> {
        let conn = self.lock()?;
        metadata::get_scope(&conn)
    }

    // ── Maintenance ──────────────────────────────────────────────

    /// Entity count, queue length and latest sync time.
    pub fn stats(&self) -> StorageResult<StoreStats> {
        let conn = self.lock()?;
        let total: i64 = conn.query_row("SELECT COUNT(*) FROM entities", [], |row| row.get(0))?;
        Ok(StoreStats {
            total_entities: total as usize,
            pending_operations: queue::count(&conn)?,
            last_synced_at: metadata::latest_sync(&conn)?,
        })
    }

    /// Wipes every table in one transaction.
    pub fn clear_all(&self) -> StorageResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        for table in schema::TABLES {
            tx.execute(&format!("DELETE FROM {table}"), [])?;
        }
        tx.commit()?;
        info!("Cleared local store");
        Ok(())
    }

    /// Rough footprint in bytes: 1 KiB per row plus cached blob bytes.
    pub fn approximate_size(&self) -> StorageResult<u64> {
        let conn = self.lock()?;
        let mut rows: i64 = 0;
        for table in schema::TABLES {
            let n: i64 =
                conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
            rows += n;
        }
        let blob_bytes: i64 =
            conn.query_row("SELECT COALESCE(SUM(size), 0) FROM blob_cache", [], |row| row.get(0))?;
        Ok((rows as u64) * 1024 + blob_bytes as u64)
    }

    /// Dumps entities, metadata, the queue and blob headers as JSON.
    pub fn export_json(&self) -> StorageResult<Value> {
        let conn = self.lock()?;

        let mut entities: BTreeMap<String, Vec<Value>> = BTreeMap::new();
        {
            let mut stmt = conn.prepare("SELECT kind, data FROM entities ORDER BY kind, id")?;
            let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
            for row in rows {
                let (kind, data) = row?;
                entities.entry(kind).or_default().push(serde_json::from_str(&data)?);
            }
        }

        let mut metadata = Vec::new();
        {
            let mut stmt = conn.prepare("SELECT entity_kind, entity_id FROM sync_metadata ORDER BY entity_kind, entity_id")?;
            let keys = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
            for key in keys {
                let (kind, id) = key?;
                if let Some(meta) = metadata::get(&conn, &kind, &id)? {
                    metadata.push(serde_json::to_value(meta)?);
                }
            }
        }

        let mut blobs = Vec::new();
        {
            let mut stmt = conn.prepare(
                "SELECT id, source_key, mime_type, size, expires_at, pinned FROM blob_cache ORDER BY created_at",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(serde_json::json!({
                    "id": row.get::<_, String>(0)?,
                    "source_key": row.get::<_, String>(1)?,
                    "mime_type": row.get::<_, String>(2)?,
                    "size": row.get::<_, i64>(3)?,
                    "expires_at": row.get::<_, Option<i64>>(4)?,
                    "pinned": row.get::<_, bool>(5)?,
                }))
            })?;
            for row in rows {
                blobs.push(row?);
            }
        }

        Ok(serde_json::json!({
            "entities": entities,
            "sync_metadata": metadata,
            "operation_queue": queue::list_pending(&conn)?,
            "blob_cache": blobs,
        }))
    }
}

pub(crate) fn decode_entity(value: Value) -> StorageResult<Entity> {
    Entity::from_value(value).map_err(|e| StorageError::InvalidData(e.to_string()))
}

pub(crate) fn put_row(conn: &Connection, kind: &str, id: &str, value: &Value) -> StorageResult<()> {
    conn.execute(
        "INSERT OR REPLACE INTO entities (kind, id, data) VALUES (?1, ?2, ?3)",
        params![kind, id, serde_json::to_string(value)?],
    )?;
    Ok(())
}

pub(crate) fn get_row(conn: &Connection, kind: &str, id: &str) -> StorageResult<Option<Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT data FROM entities WHERE kind = ?1 AND id = ?2",
            params![kind, id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(raw.map(|s| serde_json::from_str(&s)).transpose()?)
}

pub(crate) fn delete_row(conn: &Connection, kind: &str, id: &str) -> StorageResult<bool> {
    let n = conn.execute(
        "DELETE FROM entities WHERE kind = ?1 AND id = ?2",
        params![kind, id],
    )?;
    Ok(n > 0)
}

pub(crate) fn list_rows(conn: &Connection, kind: &str) -> StorageResult<Vec<Value>> {
    let mut stmt = conn.prepare("SELECT data FROM entities WHERE kind = ?1 ORDER BY id")?;
    let rows = stmt.query_map(params![kind], |row| row.get::<_, String>(0))?;
    let mut result = Vec::new();
    for row in rows {
        result.push(serde_json::from_str(&row?)?);
    }
    Ok(result)
}

pub(crate) fn list_ids(conn: &Connection, kind: &str) -> StorageResult<Vec<String>> {
    let mut stmt = conn.prepare("SELECT id FROM entities WHERE kind = ?1 ORDER BY id")?;
    let rows = stmt.query_map(params![kind], |row| row.get::<_, String>(0))?;
    let mut ids = Vec::new();
    for row in rows {
        ids.push(row?);
    }
    Ok(ids)
}
