use crate::error::{BlobCacheError, BlobCacheResult};
use offsync_storage::LocalStore;
use offsync_types::{Millis, now_millis};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

/// Derives the cache id for a source key.
pub fn blob_id(source_key: &str) -> String {
    hex::encode(Sha256::digest(source_key.as_bytes()))
}

/// Blob cache tuning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobCacheConfig {
    /// Upper bound on the summed size of cached payloads. `None` disables
    /// size-based eviction and leaves only TTL expiry.
    #[serde(default)]
    pub max_total_bytes: Option<u64>,
}

/// Everything about a cached entry except its bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobMetadata {
    pub id: String,
    pub source_key: String,
    pub mime_type: String,
    pub size: u64,
    pub created_at: Millis,
    pub last_accessed_at: Millis,
    pub expires_at: Option<Millis>,
    /// Held for a queued upload: exempt from expiry and eviction.
    pub pinned: bool,
}

impl BlobMetadata {
    /// An entry is expired from its `expires_at` instant onwards, unless it
    /// is pinned.
    pub fn is_expired_at(&self, now: Millis) -> bool {
        !self.pinned && self.expires_at.is_some_and(|at| at <= now)
    }
}

/// A cached payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedBlob {
    pub metadata: BlobMetadata,
    pub bytes: Vec<u8>,
}

/// TTL blob cache stored in the local store's `blob_cache` table.
pub struct BlobCache {
    conn: Arc<Mutex<Connection>>,
    config: BlobCacheConfig,
}

const METADATA_COLUMNS: &str =
    "id, source_key, mime_type, size, created_at, last_accessed_at, expires_at, pinned";

fn metadata_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<BlobMetadata> {
    Ok(BlobMetadata {
        id: row.get(0)?,
        source_key: row.get(1)?,
        mime_type: row.get(2)?,
        size: row.get::<_, i64>(3)? as u64,
        created_at: row.get(4)?,
        last_accessed_at: row.get(5)?,
        expires_at: row.get(6)?,
        pinned: row.get(7)?,
    })
}

impl BlobCache {
    /// Creates a cache on the store's database with no size budget.
    pub fn new(store: &LocalStore) -> Self {
        Self::with_config(store, BlobCacheConfig::default())
    }

    /// Creates a cache on the store's database.
    pub fn with_config(store: &LocalStore, config: BlobCacheConfig) -> Self {
        Self {
            conn: store.connection(),
            config,
        }
    }

    /// Opens a standalone in-memory cache (for testing).
    pub fn open_in_memory() -> BlobCacheResult<Self> {
        let store = LocalStore::open_in_memory()?;
        Ok(Self::new(&store))
    }

    pub fn config(&self) -> &BlobCacheConfig {
        &self.config
    }

    fn lock(&self) -> BlobCacheResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| BlobCacheError::LockPoisoned)
    }

    /// Caches `bytes` under `source_key`, replacing any earlier entry.
    ///
    /// With a `ttl` the entry expires at `now + ttl`; a zero or negative ttl
    /// yields an entry that is already expired. Returns the derived id.
    /// Replacing a pinned entry keeps it pinned.
    pub fn put(
        &self,
        source_key: &str,
        bytes: &[u8],
        mime_type: &str,
        ttl: Option<chrono::Duration>,
    ) -> BlobCacheResult<String> {
        self.insert(source_key, bytes, mime_type, ttl, false)
    }

    /// Like [`put`](Self::put), but the entry starts pinned and survives
    /// expiry and eviction until [`unpin`](Self::unpin).
    pub fn put_pinned(
        &self,
        source_key: &str,
        bytes: &[u8],
        mime_type: &str,
        ttl: Option<chrono::Duration>,
    ) -> BlobCacheResult<String> {
        self.insert(source_key, bytes, mime_type, ttl, true)
    }

    fn insert(
        &self,
        source_key: &str,
        bytes: &[u8],
        mime_type: &str,
        ttl: Option<chrono::Duration>,
        pinned: bool,
    ) -> BlobCacheResult<String> {
        let id = blob_id(source_key);
        let now = now_millis();
        let expires_at = ttl.map(|ttl| now.saturating_add(ttl.num_milliseconds()));

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO blob_cache (id, source_key, bytes, mime_type, size, created_at, last_accessed_at, expires_at, pinned)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                source_key = excluded.source_key,
                bytes = excluded.bytes,
                mime_type = excluded.mime_type,
                size = excluded.size,
                created_at = excluded.created_at,
                last_accessed_at = excluded.last_accessed_at,
                expires_at = excluded.expires_at,
                pinned = MAX(blob_cache.pinned, excluded.pinned)",
            params![id, source_key, bytes, mime_type, bytes.len() as i64, now, expires_at, pinned],
        )?;
        debug!("Cached {} bytes for {}", bytes.len(), source_key);

        if let Some(budget) = self.config.max_total_bytes {
            evict_to_budget(&conn, budget, &id, now)?;
        }
        Ok(id)
    }

    /// Returns the cached payload, or `None` if absent or expired.
    ///
    /// A hit refreshes `last_accessed_at`; an expired entry is deleted.
    pub fn get(&self, source_key: &str) -> BlobCacheResult<Option<CachedBlob>> {
        let id = blob_id(source_key);
        let conn = self.lock()?;
        let found = conn
            .query_row(
                &format!("SELECT {METADATA_COLUMNS}, bytes FROM blob_cache WHERE id = ?1"),
                params![id],
                |row| Ok((metadata_from_row(row)?, row.get::<_, Vec<u8>>(8)?)),
            )
            .optional()?;

        let Some((mut metadata, bytes)) = found else {
            return Ok(None);
        };

        let now = now_millis();
        if metadata.is_expired_at(now) {
            conn.execute("DELETE FROM blob_cache WHERE id = ?1", params![id])?;
            debug!("Evicted expired blob for {}", source_key);
            return Ok(None);
        }

        conn.execute(
            "UPDATE blob_cache SET last_accessed_at = ?1 WHERE id = ?2",
            params![now, id],
        )?;
        metadata.last_accessed_at = now;
        Ok(Some(CachedBlob { metadata, bytes }))
    }

    /// Pins an entry. Returns whether it exists.
    pub fn pin(&self, source_key: &str) -> BlobCacheResult<bool> {
        self.set_pinned(source_key, true)
    }

    /// Releases a pin; the entry expires and is evicted normally again.
    /// Returns whether it exists.
    pub fn unpin(&self, source_key: &str) -> BlobCacheResult<bool> {
        self.set_pinned(source_key, false)
    }

    fn set_pinned(&self, source_key: &str, pinned: bool) -> BlobCacheResult<bool> {
        let conn = self.lock()?;
        let n = conn.execute(
            "UPDATE blob_cache SET pinned = ?1 WHERE id = ?2",
            params![pinned, blob_id(source_key)],
        )?;
        if n > 0 {
            debug!("Blob for {} pinned={}", source_key, pinned);
        }
        Ok(n > 0)
    }

    /// Removes an entry. Returns whether it existed.
    pub fn remove(&self, source_key: &str) -> BlobCacheResult<bool> {
        let conn = self.lock()?;
        let n = conn.execute(
            "DELETE FROM blob_cache WHERE id = ?1",
            params![blob_id(source_key)],
        )?;
        Ok(n > 0)
    }

    /// Headers of every stored entry, oldest first.
    pub fn list(&self) -> BlobCacheResult<Vec<BlobMetadata>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {METADATA_COLUMNS} FROM blob_cache ORDER BY created_at, rowid"
        ))?;
        let rows = stmt.query_map([], metadata_from_row)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// Deletes every unpinned entry whose expiry has passed. Returns how many.
    pub fn sweep_expired(&self) -> BlobCacheResult<usize> {
        let conn = self.lock()?;
        let n = sweep(&conn, now_millis())?;
        if n > 0 {
            info!("Swept {} expired blob(s)", n);
        }
        Ok(n)
    }

    /// Summed size of every stored payload.
    pub fn total_size(&self) -> BlobCacheResult<u64> {
        let conn = self.lock()?;
        Ok(total_size(&conn)?)
    }
}

fn sweep(conn: &Connection, now: Millis) -> rusqlite::Result<usize> {
    conn.execute(
        "DELETE FROM blob_cache WHERE pinned = 0 AND expires_at IS NOT NULL AND expires_at <= ?1",
        params![now],
    )
}

fn total_size(conn: &Connection) -> rusqlite::Result<u64> {
    let total: i64 =
        conn.query_row("SELECT COALESCE(SUM(size), 0) FROM blob_cache", [], |row| row.get(0))?;
    Ok(total as u64)
}

/// Drops expired entries, then least recently accessed ones, until the cache
/// fits in `budget`. Pinned entries and the entry `keep` are never evicted.
fn evict_to_budget(conn: &Connection, budget: u64, keep: &str, now: Millis) -> rusqlite::Result<()> {
    let mut total = total_size(conn)?;
    if total <= budget {
        return Ok(());
    }
    sweep(conn, now)?;
    total = total_size(conn)?;

    let mut victims = Vec::new();
    {
        let mut stmt = conn.prepare(
            "SELECT id, size FROM blob_cache WHERE id != ?1 AND pinned = 0
             ORDER BY last_accessed_at ASC, rowid ASC",
        )?;
        let rows = stmt.query_map(params![keep], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
        })?;
        for row in rows {
            if total <= budget {
                break;
            }
            let (id, size) = row?;
            total = total.saturating_sub(size);
            victims.push(id);
        }
    }

    for id in &victims {
        conn.execute("DELETE FROM blob_cache WHERE id = ?1", params![id])?;
    }
    if !victims.is_empty() {
        info!("Evicted {} blob(s) to stay within {} bytes", victims.len(), budget);
    }
    Ok(())
}
