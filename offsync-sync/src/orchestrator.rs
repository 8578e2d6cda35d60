//! Sync orchestrator: drains the queue, pulls the active scope, sweeps blobs.
//!
//! One cycle runs at a time. A second `sync_all` while one is in flight
//! returns an empty report marked [`SkipReason::AlreadyRunning`] without
//! touching the queue.

use crate::config::SyncConfig;
use crate::conflict::{self, ConflictResolution, ConflictStrategy};
use crate::context::SyncContext;
use crate::error::{SyncError, SyncResult};
use crate::pull;
use crate::remote::UploadRequest;
use crate::report::{
    FailureDisposition, PullSummary, SkipReason, SyncFailure, SyncReport, SyncSuccess,
};
use offsync_storage::{QueuedOperation, StorageResult, StoreTransaction, SyncAction};
use offsync_types::{Entity, Millis, OperationId, now_millis};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Snapshot for a status screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub is_syncing: bool,
    pub last_sync_at: Option<Millis>,
    pub pending_operations: usize,
    pub auto_sync_running: bool,
    pub online: bool,
}

struct AutoSync {
    stop: watch::Sender<bool>,
    _task: JoinHandle<()>,
}

/// Clears the in-progress flag when a cycle ends, however it ends.
struct CycleGuard<'a>(&'a AtomicBool);

impl<'a> CycleGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Runs sync cycles against the remote authority.
pub struct SyncOrchestrator {
    /// Store, blob cache, remote and connectivity handles.
    ctx: SyncContext,
    /// Configuration.
    config: SyncConfig,
    /// Strategy in effect for the next cycle.
    resolution: RwLock<ConflictResolution>,
    /// Set while a cycle runs.
    in_progress: AtomicBool,
    /// Completion time of the last full cycle.
    last_sync_at: Mutex<Option<Millis>>,
    /// Background timer, if running.
    auto_sync: Mutex<Option<AutoSync>>,
}

impl SyncOrchestrator {
    pub fn new(ctx: SyncContext, config: SyncConfig) -> Self {
        let resolution = ConflictResolution::new(config.strategy);
        Self {
            ctx,
            config,
            resolution: RwLock::new(resolution),
            in_progress: AtomicBool::new(false),
            last_sync_at: Mutex::new(None),
            auto_sync: Mutex::new(None),
        }
    }

    pub fn context(&self) -> &SyncContext {
        &self.ctx
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    // ── Conflict strategy ────────────────────────────────────────

    /// Replaces the strategy (and resolver) used from the next cycle on.
    pub fn set_conflict_resolution(&self, resolution: ConflictResolution) {
        info!("Conflict strategy set to {}", resolution.strategy);
        *self.resolution.write().unwrap_or_else(PoisonError::into_inner) = resolution;
    }

    /// Changes the strategy, keeping any installed resolver.
    pub fn set_conflict_strategy(&self, strategy: ConflictStrategy) {
        let mut resolution = self.conflict_resolution();
        resolution.strategy = strategy;
        self.set_conflict_resolution(resolution);
    }

    pub fn conflict_resolution(&self) -> ConflictResolution {
        self.resolution
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // ── Status ───────────────────────────────────────────────────

    pub fn is_syncing(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    pub fn last_sync_at(&self) -> Option<Millis> {
        *lock(&self.last_sync_at)
    }

    pub fn is_auto_syncing(&self) -> bool {
        lock(&self.auto_sync).is_some()
    }

    pub async fn status(&self) -> SyncResult<SyncStatus> {
        let pending_operations = self.ctx.with_store(|s| s.pending_count()).await?;
        Ok(SyncStatus {
            is_syncing: self.is_syncing(),
            last_sync_at: self.last_sync_at(),
            pending_operations,
            auto_sync_running: self.is_auto_syncing(),
            online: self.ctx.is_online(),
        })
    }

    /// Online and the remote answers its health probe.
    pub async fn can_sync(&self) -> bool {
        self.ctx.is_online() && self.remote_healthy().await
    }

    async fn remote_healthy(&self) -> bool {
        match self.ctx.remote.health().await {
            Ok(healthy) => healthy,
            Err(e) => {
                debug!("Health probe failed: {}", e);
                false
            }
        }
    }

    /// Queues an action with the configured retry ceiling.
    pub async fn queue_operation(&self, action: SyncAction) -> SyncResult<OperationId> {
        let max_retries = self.config.default_max_retries;
        self.ctx
            .with_store(move |s| s.enqueue_with_retries(action, max_retries))
            .await
    }

    // ── Cycle ────────────────────────────────────────────────────

    /// Runs one sync cycle.
    ///
    /// Per-operation remote failures are reported, not returned. A local
    /// storage failure aborts the cycle with [`SyncError::CycleAborted`],
    /// carrying what had completed.
    pub async fn sync_all(&self) -> SyncResult<SyncReport> {
        if !self.ctx.is_online() {
            debug!("Offline, skipping sync");
            return Ok(SyncReport::skipped(SkipReason::Offline));
        }
        let Some(_guard) = CycleGuard::acquire(&self.in_progress) else {
            warn!("Sync already in progress");
            return Ok(SyncReport::skipped(SkipReason::AlreadyRunning));
        };
        if self.config.check_health && !self.remote_healthy().await {
            info!("Remote unhealthy, skipping sync");
            return Ok(SyncReport::skipped(SkipReason::RemoteUnhealthy));
        }

        let started = Instant::now();
        let resolution = self.conflict_resolution();
        let mut report = SyncReport::default();

        if let Err(e) = self.drain_queue(&resolution, &mut report).await {
            return Err(self.abort(report, e));
        }
        match self.pull().await {
            Ok(summary) => report.pull = summary,
            Err(e) => return Err(self.abort(report, e)),
        }
        match self.ctx.with_blobs(|b| b.sweep_expired()).await {
            Ok(swept) => report.swept_blobs = swept,
            Err(e) => return Err(self.abort(report, e)),
        }

        *lock(&self.last_sync_at) = Some(now_millis());
        info!("Sync complete in {:?}: {}", started.elapsed(), report);
        Ok(report)
    }

    fn abort(&self, report: SyncReport, error: SyncError) -> SyncError {
        warn!("Sync aborted after {}: {}", report, error);
        SyncError::aborted(report, error)
    }

    async fn drain_queue(
        &self,
        resolution: &ConflictResolution,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        let pending = self.ctx.with_store(|s| s.list_pending()).await?;
        if !pending.is_empty() {
            info!("Draining {} queued operations", pending.len());
        }

        for queued in pending {
            // Re-read: an earlier create may have re-targeted this operation.
            let id = queued.id;
            let Some(operation) = self.ctx.with_store(move |s| s.get_operation(&id)).await? else {
                continue;
            };
            match self.process(&operation, resolution).await {
                Ok(conflicts) => {
                    debug!("Synced {}", operation.action);
                    report.successful.push(SyncSuccess {
                        operation,
                        conflicts,
                    });
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => report.failed.push(self.handle_failure(operation, e).await?),
            }
        }
        Ok(())
    }

    async fn handle_failure(
        &self,
        operation: QueuedOperation,
        error: SyncError,
    ) -> SyncResult<SyncFailure> {
        let id = operation.id;
        let (operation, disposition) = if error.is_retryable() {
            match self.ctx.with_store(move |s| s.record_failure(&id)).await? {
                Some(updated) if !updated.is_exhausted() => {
                    (updated, FailureDisposition::WillRetry)
                }
                Some(updated) => {
                    self.ctx.with_store(move |s| s.remove_operation(&id)).await?;
                    (updated, FailureDisposition::Dropped)
                }
                None => (operation, FailureDisposition::Dropped),
            }
        } else {
            self.ctx.with_store(move |s| s.remove_operation(&id)).await?;
            (operation, FailureDisposition::Dropped)
        };

        if disposition == FailureDisposition::Dropped {
            self.release_upload_blob(&operation.action).await?;
        }
        match disposition {
            FailureDisposition::WillRetry => warn!(
                "{} failed (attempt {}/{}): {}",
                operation.action, operation.retry_count, operation.max_retries, error
            ),
            FailureDisposition::Dropped => {
                warn!("{} dropped: {}", operation.action, error)
            }
        }
        Ok(SyncFailure {
            operation,
            error: error.to_string(),
            disposition,
        })
    }

    /// Unpins the cached bytes behind an upload that has left the queue.
    async fn release_upload_blob(&self, action: &SyncAction) -> SyncResult<()> {
        if let SyncAction::UploadDocument(upload) = action {
            let key = upload.source_key.clone();
            self.ctx.with_blobs(move |b| b.unpin(&key)).await?;
        }
        Ok(())
    }

    /// Sends one operation and applies the result locally. The local write
    /// and the dequeue commit together.
    async fn process(
        &self,
        operation: &QueuedOperation,
        resolution: &ConflictResolution,
    ) -> SyncResult<Vec<String>> {
        let op_id = operation.id;
        let remote = &self.ctx.remote;

        match &operation.action {
            SyncAction::CreateEntity { kind, entity } => {
                let created = remote
                    .create(kind, &entity.to_fields(), &op_id.to_string())
                    .await?;
                let kind = kind.clone();
                let local_id = entity.id.clone();
                self.ctx
                    .with_store(move |store| {
                        store.transaction(|tx| {
                            if created.id != local_id {
                                let moved =
                                    tx.rewrite_queued_entity_id(&kind, &local_id, &created.id)?;
                                debug!(
                                    "Remote assigned {} to {}/{} ({} queued operations re-targeted)",
                                    created.id, kind, local_id, moved
                                );
                            }
                            tx.remove_operation(&op_id)?;
                            store_remote_copy(tx, kind.as_str(), &local_id, &created)
                        })
                    })
                    .await?;
                Ok(Vec::new())
            }

            SyncAction::UpdateEntity {
                kind,
                id,
                changes,
                base,
            } => {
                let current = remote.fetch(kind, id).await?;
                let baseline = match base {
                    Some(base) => Some(base.clone()),
                    None => {
                        let (k, i) = (kind.to_string(), id.clone());
                        self.ctx.with_store(move |s| s.get_entity(&k, &i)).await?
                    }
                };
                let local = baseline.map(|e| e.to_fields());
                let resolved =
                    conflict::resolve(local.as_ref(), &current.to_fields(), changes, resolution);
                let updated = remote.update(kind, id, &resolved.payload).await?;

                let (kind, id) = (kind.clone(), id.clone());
                self.ctx
                    .with_store(move |store| {
                        store.transaction(|tx| {
                            tx.remove_operation(&op_id)?;
                            store_remote_copy(tx, kind.as_str(), &id, &updated)
                        })
                    })
                    .await?;
                Ok(resolved.conflicts)
            }

            SyncAction::DeleteEntity { kind, id } | SyncAction::DeleteDocument { kind, id } => {
                match remote.delete(kind, id).await {
                    Ok(()) => {}
                    Err(e) if e.status() == Some(404) => {
                        debug!("{}/{} already gone on the remote", kind, id);
                    }
                    Err(e) => return Err(e),
                }
                let (kind, id) = (kind.clone(), id.clone());
                self.ctx
                    .with_store(move |store| {
                        store.transaction(|tx| {
                            tx.remove_operation(&op_id)?;
                            tx.delete(kind.as_str(), &id)?;
                            tx.delete_sync_metadata(kind.as_str(), &id)?;
                            Ok(())
                        })
                    })
                    .await?;
                Ok(Vec::new())
            }

            SyncAction::UploadDocument(upload) => {
                let key = upload.source_key.clone();
                let blob = self
                    .ctx
                    .with_blobs(move |b| b.get(&key))
                    .await?
                    .ok_or_else(|| SyncError::MissingBlob(upload.source_key.clone()))?;
                let document = UploadRequest {
                    filename: upload.filename.clone(),
                    mime_type: upload.mime_type.clone(),
                    bytes: blob.bytes,
                    metadata: upload.metadata.clone(),
                };
                let uploaded = remote
                    .upload(&upload.kind, &upload.id, document, &op_id.to_string())
                    .await?;

                let (kind, id) = (upload.kind.clone(), upload.id.clone());
                self.ctx
                    .with_store(move |store| {
                        store.transaction(|tx| {
                            tx.remove_operation(&op_id)?;
                            if let Some(mut doc) = tx.get_entity(kind.as_str(), &id)? {
                                doc.fields
                                    .insert("fileUrl".to_string(), uploaded.file_url.into());
                                tx.put_entity(kind.as_str(), &doc)?;
                            }
                            Ok(())
                        })
                    })
                    .await?;
                self.release_upload_blob(&operation.action).await?;
                Ok(Vec::new())
            }
        }
    }

    async fn pull(&self) -> SyncResult<Option<PullSummary>> {
        let Some(scope) = self.ctx.with_store(|s| s.active_scope()).await? else {
            return Ok(None);
        };

        let mut total = PullSummary::default();
        for kind in scope.kinds {
            let entities = self.ctx.remote.fetch_scope(&scope.path, &kind).await?;
            debug!("Pulled {} {} from {}", entities.len(), kind, scope.path);
            let summary = self
                .ctx
                .with_store(move |s| pull::reconcile(s, &kind, &entities))
                .await?;
            total.absorb(summary);
        }
        Ok(Some(total))
    }

    // ── Auto sync ────────────────────────────────────────────────

    /// Starts a background timer running [`sync_all`](Self::sync_all) every
    /// `interval` (the configured default if `None`), replacing any timer
    /// already running. The first cycle starts immediately.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start_auto_sync(self: &Arc<Self>, interval: Option<Duration>) {
        let interval = interval.unwrap_or_else(|| self.config.auto_sync_interval());
        let (stop, mut stopped) = watch::channel(false);
        let weak: Weak<Self> = Arc::downgrade(self);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = stopped.changed() => break,
                    _ = ticker.tick() => {}
                }
                let Some(this) = weak.upgrade() else { break };
                match this.sync_all().await {
                    Ok(report) if report.is_skipped() => debug!("Auto sync {}", report),
                    Ok(_) => {}
                    Err(e) => warn!("Auto sync failed: {}", e),
                }
            }
            debug!("Auto sync stopped");
        });

        let previous = lock(&self.auto_sync).replace(AutoSync { stop, _task: task });
        if let Some(previous) = previous {
            let _ = previous.stop.send(true);
        }
        info!("Auto sync started every {:?}", interval);
    }

    /// Stops the background timer. A cycle already in flight runs to
    /// completion. Returns whether a timer was running.
    pub fn stop_auto_sync(&self) -> bool {
        match lock(&self.auto_sync).take() {
            Some(auto_sync) => {
                let _ = auto_sync.stop.send(true);
                info!("Auto sync stopped");
                true
            }
            None => false,
        }
    }
}

impl Drop for SyncOrchestrator {
    fn drop(&mut self) {
        if let Some(auto_sync) = lock(&self.auto_sync).take() {
            let _ = auto_sync.stop.send(true);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Writes the remote's copy of an entity locally after a push.
///
/// If more operations on the entity are still queued, the local fields are
/// kept and only the id and version are taken from the remote, so later
/// unsent edits stay visible.
fn store_remote_copy(
    tx: &StoreTransaction<'_>,
    kind: &str,
    local_id: &str,
    remote: &Entity,
) -> StorageResult<()> {
    let still_pending = tx.pending_entity_ids(kind)?.contains(&remote.id);
    let stored = if still_pending {
        match tx.get_entity(kind, local_id)? {
            Some(mut local) => {
                local.id = remote.id.clone();
                local.version = remote.version;
                local
            }
            None => return Ok(()),
        }
    } else {
        remote.clone()
    };

    if local_id != remote.id {
        tx.delete(kind, local_id)?;
        tx.delete_sync_metadata(kind, local_id)?;
    }
    tx.put_entity(kind, &stored)?;
    tx.update_sync_metadata(kind, &remote.id, remote.version, Some(&remote.checksum()))?;
    Ok(())
}
