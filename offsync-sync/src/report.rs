//! What a sync cycle did.

use offsync_storage::QueuedOperation;
use serde::Serialize;
use std::fmt;

/// Why a cycle did no work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Offline,
    RemoteUnhealthy,
    AlreadyRunning,
}

/// What happens to a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureDisposition {
    /// Still queued; attempted again next cycle.
    WillRetry,
    /// Removed from the queue.
    Dropped,
}

/// A queued operation that reached the remote.
#[derive(Debug, Clone, Serialize)]
pub struct SyncSuccess {
    pub operation: QueuedOperation,
    /// Fields the merge strategy found changed on both sides.
    pub conflicts: Vec<String>,
}

/// A queued operation that did not.
#[derive(Debug, Clone, Serialize)]
pub struct SyncFailure {
    /// The operation as of this failure, retry count included.
    pub operation: QueuedOperation,
    pub error: String,
    pub disposition: FailureDisposition,
}

impl SyncFailure {
    pub fn is_dropped(&self) -> bool {
        self.disposition == FailureDisposition::Dropped
    }
}

/// Counters from the pull step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PullSummary {
    /// Entities written from the remote.
    pub upserted: usize,
    /// Local entities removed because the remote no longer lists them.
    pub deleted: usize,
    /// Remote entities skipped because local writes are still queued.
    pub preserved: usize,
}

impl PullSummary {
    pub(crate) fn absorb(&mut self, other: PullSummary) {
        self.upserted += other.upserted;
        self.deleted += other.deleted;
        self.preserved += other.preserved;
    }
}

/// Result of one sync cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub successful: Vec<SyncSuccess>,
    pub failed: Vec<SyncFailure>,
    /// `None` when no scope is active or the cycle stopped before pulling.
    pub pull: Option<PullSummary>,
    pub swept_blobs: usize,
    /// Set when the cycle did nothing at all.
    pub skipped: Option<SkipReason>,
}

impl SyncReport {
    pub fn skipped(reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            ..Self::default()
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.skipped.is_some()
    }

    /// Failures that left the operation queued.
    pub fn retrying(&self) -> impl Iterator<Item = &SyncFailure> {
        self.failed.iter().filter(|f| !f.is_dropped())
    }

    /// Failures that removed the operation from the queue.
    pub fn dropped(&self) -> impl Iterator<Item = &SyncFailure> {
        self.failed.iter().filter(|f| f.is_dropped())
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(reason) = self.skipped {
            return write!(f, "skipped ({reason:?})");
        }
        write!(
            f,
            "{} synced, {} failed ({} dropped)",
            self.successful.len(),
            self.failed.len(),
            self.dropped().count()
        )?;
        if let Some(pull) = &self.pull {
            write!(
                f,
                ", pulled {} (removed {}, kept {} pending)",
                pull.upserted, pull.deleted, pull.preserved
            )?;
        }
        if self.swept_blobs > 0 {
            write!(f, ", swept {} blobs", self.swept_blobs)?;
        }
        Ok(())
    }
}
