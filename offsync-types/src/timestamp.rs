//! Wall-clock timestamps.
//!
//! Everything persisted by the engine (queue entries, sync metadata, cache
//! expiry) uses signed milliseconds since the Unix epoch. Signed so that a
//! negative TTL produces an expiry in the past instead of wrapping.

/// Milliseconds since the Unix epoch.
pub type Millis = i64;

/// Returns the current wall-clock time in milliseconds.
#[must_use]
pub fn now_millis() -> Millis {
    chrono::Utc::now().timestamp_millis()
}
