//! The operation queue.
//!
//! An append-only, insertion-ordered log of [`SyncAction`]s. Order comes from
//! an AUTOINCREMENT sequence column rather than `created_at`, so two
//! operations enqueued within the same millisecond still drain in the order
//! they were written.

use crate::action::SyncAction;
use crate::error::{StorageError, StorageResult};
use offsync_types::{EntityKind, Millis, OperationId, now_millis};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Retry ceiling used when the caller does not pick one.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// A write waiting in the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedOperation {
    pub id: OperationId,
    pub action: SyncAction,
    pub created_at: Millis,
    pub retry_count: u32,
    pub max_retries: u32,
}

impl QueuedOperation {
    /// True once the operation has used up its retries.
    pub fn is_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}

const SELECT_COLUMNS: &str = "id, action, created_at, retry_count, max_retries";

fn from_row(row: &Row<'_>) -> rusqlite::Result<(String, String, Millis, u32, u32)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn decode(raw: (String, String, Millis, u32, u32)) -> StorageResult<QueuedOperation> {
    let (id, action, created_at, retry_count, max_retries) = raw;
    let id = OperationId::parse(&id)
        .map_err(|e| StorageError::InvalidData(format!("invalid operation id {id}: {e}")))?;
    Ok(QueuedOperation {
        id,
        action: serde_json::from_str(&action)?,
        created_at,
        retry_count,
        max_retries,
    })
}

/// Appends `action` under a caller-chosen id. The id must not already be
/// queued.
pub(crate) fn enqueue(
    conn: &Connection,
    id: OperationId,
    action: SyncAction,
    max_retries: u32,
) -> StorageResult<QueuedOperation> {
    let op = QueuedOperation {
        id,
        created_at: now_millis(),
        retry_count: 0,
        max_retries,
        action,
    };
    conn.execute(
        "INSERT INTO operation_queue (id, entity_kind, entity_id, action, created_at, retry_count, max_retries)
         VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
        params![
            op.id.to_string(),
            op.action.kind().as_str(),
            op.action.entity_id(),
            serde_json::to_string(&op.action)?,
            op.created_at,
            op.max_retries,
        ],
    )?;
    Ok(op)
}

pub(crate) fn list_pending(conn: &Connection) -> StorageResult<Vec<QueuedOperation>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SELECT_COLUMNS} FROM operation_queue ORDER BY seq ASC"
    ))?;
    let rows = stmt.query_map([], from_row)?;
    let mut result = Vec::new();
    for row in rows {
        result.push(decode(row?)?);
    }
    Ok(result)
}

pub(crate) fn get(conn: &Connection, id: &OperationId) -> StorageResult<Option<QueuedOperation>> {
    let raw = conn
        .query_row(
            &format!("SELECT {SELECT_COLUMNS} FROM operation_queue WHERE id = ?1"),
            params![id.to_string()],
            from_row,
        )
        .optional()?;
    raw.map(decode).transpose()
}

/// Bumps `retry_count`, saturating at `max_retries`.
pub(crate) fn record_failure(
    conn: &Connection,
    id: &OperationId,
) -> StorageResult<Option<QueuedOperation>> {
    conn.execute(
        "UPDATE operation_queue SET retry_count = MIN(retry_count + 1, max_retries) WHERE id = ?1",
        params![id.to_string()],
    )?;
    get(conn, id)
}

pub(crate) fn remove(conn: &Connection, id: &OperationId) -> StorageResult<bool> {
    let n = conn.execute(
        "DELETE FROM operation_queue WHERE id = ?1",
        params![id.to_string()],
    )?;
    Ok(n > 0)
}

pub(crate) fn count(conn: &Connection) -> StorageResult<usize> {
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM operation_queue", [], |row| row.get(0))?;
    Ok(n as usize)
}

pub(crate) fn pending_entity_ids(conn: &Connection, kind: &str) -> StorageResult<HashSet<String>> {
    let mut stmt =
        conn.prepare("SELECT DISTINCT entity_id FROM operation_queue WHERE entity_kind = ?1")?;
    let rows = stmt.query_map(params![kind], |row| row.get::<_, String>(0))?;
    let mut ids = HashSet::new();
    for row in rows {
        ids.insert(row?);
    }
    Ok(ids)
}

/// Re-targets every queued operation on `(kind, old_id)` at `new_id`.
pub(crate) fn rewrite_entity_id(
    conn: &Connection,
    kind: &EntityKind,
    old_id: &str,
    new_id: &str,
) -> StorageResult<usize> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SELECT_COLUMNS} FROM operation_queue WHERE entity_kind = ?1 AND entity_id = ?2 ORDER BY seq"
    ))?;
    let rows = stmt.query_map(params![kind.as_str(), old_id], from_row)?;
    let mut affected = Vec::new();
    for row in rows {
        affected.push(decode(row?)?);
    }
    drop(stmt);

    let mut rewritten = 0;
    for mut op in affected {
        if op.action.rewrite_entity_id(kind, old_id, new_id) {
            conn.execute(
                "UPDATE operation_queue SET entity_id = ?1, action = ?2 WHERE id = ?3",
                params![new_id, serde_json::to_string(&op.action)?, op.id.to_string()],
            )?;
            rewritten += 1;
        }
    }
    Ok(rewritten)
}
