//! Scoped multi-record writes.

use crate::action::SyncAction;
use crate::error::StorageResult;
use crate::metadata::{self, SyncMetadata};
use crate::queue::{self, QueuedOperation};
use crate::store::{decode_entity, delete_row, get_row, list_ids, put_row};
use offsync_types::{Entity, EntityKind, OperationId};
use rusqlite::Connection;
use serde_json::Value;
use std::collections::HashSet;

/// Handle passed to the closure of [`LocalStore::transaction`](crate::LocalStore::transaction).
///
/// Reads see the transaction's own uncommitted writes.
pub struct StoreTransaction<'a> {
    conn: &'a Connection,
}

impl<'a> StoreTransaction<'a> {
    pub(crate) fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn put(&self, kind: &str, id: &str, value: &Value) -> StorageResult<()> {
        put_row(self.conn, kind, id, value)
    }

    pub fn get(&self, kind: &str, id: &str) -> StorageResult<Option<Value>> {
        get_row(self.conn, kind, id)
    }

    pub fn delete(&self, kind: &str, id: &str) -> StorageResult<bool> {
        delete_row(self.conn, kind, id)
    }

    pub fn list_ids(&self, kind: &str) -> StorageResult<Vec<String>> {
        list_ids(self.conn, kind)
    }

    pub fn put_entity(&self, kind: &str, entity: &Entity) -> StorageResult<()> {
        put_row(self.conn, kind, &entity.id, &entity.to_value())
    }

    pub fn get_entity(&self, kind: &str, id: &str) -> StorageResult<Option<Entity>> {
        get_row(self.conn, kind, id)?.map(decode_entity).transpose()
    }

    pub fn update_sync_metadata(
        &self,
        kind: &str,
        id: &str,
        version: u64,
        checksum: Option<&str>,
    ) -> StorageResult<SyncMetadata> {
        metadata::upsert(self.conn, kind, id, version, checksum)
    }

    pub fn delete_sync_metadata(&self, kind: &str, id: &str) -> StorageResult<bool> {
        metadata::delete(self.conn, kind, id)
    }

    /// Appends to the queue as part of the transaction.
    pub fn enqueue(&self, action: SyncAction, max_retries: u32) -> StorageResult<QueuedOperation> {
        self.enqueue_with_id(OperationId::new(), action, max_retries)
    }

    /// Enqueues under an id the caller already used, e.g. as the idempotency
    /// key of a write-through attempt that may have reached the remote.
    pub fn enqueue_with_id(
        &self,
        id: OperationId,
        action: SyncAction,
        max_retries: u32,
    ) -> StorageResult<QueuedOperation> {
        queue::enqueue(self.conn, id, action, max_retries)
    }

    /// Dequeues an operation as part of the transaction.
    pub fn remove_operation(&self, id: &OperationId) -> StorageResult<bool> {
        queue::remove(self.conn, id)
    }

    pub fn pending_entity_ids(&self, kind: &str) -> StorageResult<HashSet<String>> {
        queue::pending_entity_ids(self.conn, kind)
    }

    /// Re-targets queued operations after the remote assigned a new id.
    pub fn rewrite_queued_entity_id(
        &self,
        kind: &EntityKind,
        old_id: &str,
        new_id: &str,
    ) -> StorageResult<usize> {
        queue::rewrite_entity_id(self.conn, kind, old_id, new_id)
    }
}
