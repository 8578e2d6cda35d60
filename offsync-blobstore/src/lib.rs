//! Content-keyed blob cache for offsync.
//!
//! Caches downloaded or locally produced binary payloads (document scans,
//! photos) inside the local store's database. Each entry is keyed by a
//! SHA-256 of its source key, so caching the same key twice replaces the
//! earlier entry instead of duplicating it.
//!
//! Expired entries are never returned: `get` deletes them on sight, and
//! [`BlobCache::sweep_expired`] removes the rest in bulk. An optional byte
//! budget evicts the least recently accessed entries after each `put`.
//!
//! A pinned entry backs an upload that has not reached the remote yet. It is
//! skipped by expiry, sweeping and eviction until it is unpinned.

mod cache;
mod error;

pub use cache::{BlobCache, BlobCacheConfig, BlobMetadata, CachedBlob, blob_id};
pub use error::{BlobCacheError, BlobCacheResult};
