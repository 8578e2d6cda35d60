//! Offline-first write path.
//!
//! Each write goes straight to the remote when online and no earlier write
//! to the same entity is still queued. Otherwise, or when the remote cannot
//! be reached, the local store is updated and the operation queued in one
//! transaction.

use crate::config::SyncConfig;
use crate::context::SyncContext;
use crate::error::{SyncError, SyncResult};
use crate::pull;
use crate::remote::UploadRequest;
use offsync_blobstore::CachedBlob;
use offsync_storage::{DocumentUpload, SyncAction};
use offsync_types::{Entity, EntityKind, Fields, OperationId};
use serde_json::Value;
use tracing::{debug, info};

/// Result of a write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome<T> {
    /// The remote accepted the write.
    Synced(T),
    /// Stored locally and queued for the next cycle.
    Queued { value: T, operation: OperationId },
}

impl<T> WriteOutcome<T> {
    pub fn value(&self) -> &T {
        match self {
            WriteOutcome::Synced(value) | WriteOutcome::Queued { value, .. } => value,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            WriteOutcome::Synced(value) | WriteOutcome::Queued { value, .. } => value,
        }
    }

    pub fn is_queued(&self) -> bool {
        matches!(self, WriteOutcome::Queued { .. })
    }
}

/// A document to store and upload.
#[derive(Debug, Clone)]
pub struct NewDocument {
    /// Client id; generated when `None`.
    pub id: Option<String>,
    pub filename: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
    pub metadata: Fields,
}

/// The application's entry point for reads and writes.
pub struct OfflineWriter {
    ctx: SyncContext,
    config: SyncConfig,
}

impl OfflineWriter {
    pub fn new(ctx: SyncContext, config: SyncConfig) -> Self {
        Self { ctx, config }
    }

    /// Whether a write to this entity may bypass the queue.
    async fn can_write_through(&self, kind: &EntityKind, id: &str) -> SyncResult<bool> {
        if !self.ctx.is_online() {
            return Ok(false);
        }
        let (k, i) = (kind.to_string(), id.to_string());
        let pending = self
            .ctx
            .with_store(move |s| Ok(s.pending_entity_ids(&k)?.contains(&i)))
            .await?;
        Ok(!pending)
    }

    /// Stores `local` and queues `action` under `operation` atomically.
    async fn queue<T: Send + 'static>(
        &self,
        kind: &EntityKind,
        operation: OperationId,
        local: LocalWrite,
        action: SyncAction,
        value: T,
    ) -> SyncResult<WriteOutcome<T>> {
        let max_retries = self.config.default_max_retries;
        let kind_name = kind.to_string();
        self.ctx
            .with_store(move |store| {
                store.transaction(|tx| {
                    match &local {
                        LocalWrite::Put(entity) => tx.put_entity(&kind_name, entity)?,
                        LocalWrite::Delete(id) => {
                            tx.delete(&kind_name, id)?;
                        }
                    }
                    tx.enqueue_with_id(operation, action, max_retries)?;
                    Ok(())
                })
            })
            .await?;
        debug!("Queued offline write {}", operation);
        Ok(WriteOutcome::Queued { value, operation })
    }

    /// Records an entity the remote just returned.
    async fn store_synced(&self, kind: &EntityKind, entity: Entity) -> SyncResult<Entity> {
        let kind = kind.to_string();
        self.ctx
            .with_store(move |store| {
                store.transaction(|tx| {
                    tx.put_entity(&kind, &entity)?;
                    tx.update_sync_metadata(
                        &kind,
                        &entity.id,
                        entity.version,
                        Some(&entity.checksum()),
                    )?;
                    Ok(())
                })?;
                Ok(entity)
            })
            .await
    }

    /// Creates an entity. `fields["id"]` is used as the client id if it is a
    /// non-empty string; otherwise one is generated.
    pub async fn create(
        &self,
        kind: &EntityKind,
        fields: Fields,
    ) -> SyncResult<WriteOutcome<Entity>> {
        let id = match fields.get("id") {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            _ => uuid::Uuid::new_v4().to_string(),
        };
        let mut entity = Entity::new(id);
        entity.apply(&fields);
        entity.updated_at = Some(chrono::Utc::now());

        // Reused as the queued operation's id so a replay carries the same key.
        let operation = OperationId::new();
        if self.ctx.is_online() {
            let key = operation.to_string();
            match self.ctx.remote.create(kind, &entity.to_fields(), &key).await {
                Ok(created) => {
                    return Ok(WriteOutcome::Synced(self.store_synced(kind, created).await?));
                }
                Err(e) if e.is_retryable() => info!("Create of {} deferred: {}", kind, e),
                Err(e) => return Err(e),
            }
        }

        let action = SyncAction::CreateEntity {
            kind: kind.clone(),
            entity: entity.clone(),
        };
        self.queue(kind, operation, LocalWrite::Put(entity.clone()), action, entity)
            .await
    }

    /// Applies `changes` to an existing local entity.
    pub async fn update(
        &self,
        kind: &EntityKind,
        id: &str,
        changes: Fields,
    ) -> SyncResult<WriteOutcome<Entity>> {
        let (k, i) = (kind.to_string(), id.to_string());
        let base = self
            .ctx
            .with_store(move |s| s.get_entity(&k, &i))
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("{kind}/{id}")))?;

        if self.can_write_through(kind, id).await? {
            match self.ctx.remote.update(kind, id, &changes).await {
                Ok(updated) => {
                    return Ok(WriteOutcome::Synced(self.store_synced(kind, updated).await?));
                }
                Err(e) if e.is_retryable() => info!("Update of {}/{} deferred: {}", kind, id, e),
                Err(e) => return Err(e),
            }
        }

        let mut updated = base.clone();
        updated.apply(&changes);
        updated.updated_at = Some(chrono::Utc::now());
        let action = SyncAction::UpdateEntity {
            kind: kind.clone(),
            id: id.to_string(),
            changes,
            base: Some(base),
        };
        self.queue(kind, OperationId::new(), LocalWrite::Put(updated.clone()), action, updated)
            .await
    }

    /// Deletes an entity.
    pub async fn delete(&self, kind: &EntityKind, id: &str) -> SyncResult<WriteOutcome<()>> {
        self.delete_with(kind, id, false).await
    }

    /// Deletes a document record.
    pub async fn delete_document(
        &self,
        kind: &EntityKind,
        id: &str,
    ) -> SyncResult<WriteOutcome<()>> {
        self.delete_with(kind, id, true).await
    }

    async fn delete_with(
        &self,
        kind: &EntityKind,
        id: &str,
        document: bool,
    ) -> SyncResult<WriteOutcome<()>> {
        if self.can_write_through(kind, id).await? {
            let result = match self.ctx.remote.delete(kind, id).await {
                Err(e) if e.status() == Some(404) => Ok(()),
                other => other,
            };
            match result {
                Ok(()) => {
                    let (k, i) = (kind.to_string(), id.to_string());
                    self.ctx
                        .with_store(move |store| {
                            store.transaction(|tx| {
                                tx.delete(&k, &i)?;
                                tx.delete_sync_metadata(&k, &i)?;
                                Ok(())
                            })
                        })
                        .await?;
                    return Ok(WriteOutcome::Synced(()));
                }
                Err(e) if e.is_retryable() => info!("Delete of {}/{} deferred: {}", kind, id, e),
                Err(e) => return Err(e),
            }
        }

        let (kind, id) = (kind.clone(), id.to_string());
        let action = if document {
            SyncAction::DeleteDocument {
                kind: kind.clone(),
                id: id.clone(),
            }
        } else {
            SyncAction::DeleteEntity {
                kind: kind.clone(),
                id: id.clone(),
            }
        };
        self.queue(&kind, OperationId::new(), LocalWrite::Delete(id), action, ())
            .await
    }

    /// Reads an entity, falling back to the remote when it is not stored
    /// locally. Remote failures read as absent.
    pub async fn get(&self, kind: &EntityKind, id: &str) -> SyncResult<Option<Entity>> {
        let (k, i) = (kind.to_string(), id.to_string());
        if let Some(local) = self.ctx.with_store(move |s| s.get_entity(&k, &i)).await? {
            return Ok(Some(local));
        }
        if !self.ctx.is_online() {
            return Ok(None);
        }
        match self.ctx.remote.fetch(kind, id).await {
            Ok(entity) => Ok(Some(self.store_synced(kind, entity).await?)),
            Err(e) => {
                debug!("Remote read of {}/{} failed: {}", kind, id, e);
                Ok(None)
            }
        }
    }

    /// Lists a kind within a scope. Online, the remote listing is reconciled
    /// into the store first; offline, the local copy is returned as is.
    pub async fn list_in_scope(&self, scope: &str, kind: &EntityKind) -> SyncResult<Vec<Entity>> {
        if self.ctx.is_online() {
            match self.ctx.remote.fetch_scope(scope, kind).await {
                Ok(entities) => {
                    let k = kind.clone();
                    self.ctx
                        .with_store(move |s| pull::reconcile(s, &k, &entities))
                        .await?;
                }
                Err(e) => debug!("Remote listing of {} failed, using local copy: {}", kind, e),
            }
        }
        let k = kind.to_string();
        self.ctx.with_store(move |s| s.list_entities(&k)).await
    }

    /// Caches a document's bytes and creates its record.
    ///
    /// The bytes are cached under `local://{kind}/{id}` for the configured
    /// document TTL. Online, they are uploaded at once and `fileUrl` points
    /// at the remote copy; otherwise `fileUrl` is the cache key and the
    /// upload is queued. The cached copy stays pinned until the upload
    /// lands.
    pub async fn upload_document(
        &self,
        kind: &EntityKind,
        document: NewDocument,
    ) -> SyncResult<WriteOutcome<Entity>> {
        let id = document
            .id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let source_key = format!("local://{kind}/{id}");
        let size = document.bytes.len();

        let (key, bytes, mime, ttl) = (
            source_key.clone(),
            document.bytes.clone(),
            document.mime_type.clone(),
            self.config.document_ttl(),
        );
        self.ctx
            .with_blobs(move |b| b.put_pinned(&key, &bytes, &mime, Some(ttl)))
            .await?;

        let mut record = Entity::new(id.clone());
        record.apply(&document.metadata);
        record.updated_at = Some(chrono::Utc::now());
        record = record
            .with_field("filename", document.filename.clone())
            .with_field("mimeType", document.mime_type.clone())
            .with_field("fileSize", size as u64)
            .with_field("fileUrl", source_key.clone());

        let operation = OperationId::new();
        if self.can_write_through(kind, &id).await? {
            let request = UploadRequest {
                filename: document.filename.clone(),
                mime_type: document.mime_type.clone(),
                bytes: document.bytes,
                metadata: document.metadata.clone(),
            };
            let key = operation.to_string();
            match self.ctx.remote.upload(kind, &id, request, &key).await {
                Ok(uploaded) => {
                    self.release_blob(&source_key).await?;
                    let record = record.with_field("fileUrl", uploaded.file_url);
                    let k = kind.to_string();
                    let stored = record.clone();
                    self.ctx
                        .with_store(move |s| s.put_entity(&k, &stored))
                        .await?;
                    return Ok(WriteOutcome::Synced(record));
                }
                Err(e) if e.is_retryable() => info!("Upload of {}/{} deferred: {}", kind, id, e),
                Err(e) => {
                    self.release_blob(&source_key).await?;
                    return Err(e);
                }
            }
        }

        let action = SyncAction::UploadDocument(DocumentUpload {
            kind: kind.clone(),
            id,
            source_key,
            filename: document.filename,
            mime_type: document.mime_type,
            metadata: document.metadata,
        });
        self.queue(kind, operation, LocalWrite::Put(record.clone()), action, record)
            .await
    }

    async fn release_blob(&self, source_key: &str) -> SyncResult<()> {
        let key = source_key.to_string();
        self.ctx.with_blobs(move |b| b.unpin(&key)).await?;
        Ok(())
    }

    /// Cached bytes behind a document record whose `fileUrl` is a cache key.
    pub async fn cached_document(&self, record: &Entity) -> SyncResult<Option<CachedBlob>> {
        let Some(url) = record.get_str("fileUrl").map(str::to_string) else {
            return Ok(None);
        };
        self.ctx.with_blobs(move |b| b.get(&url)).await
    }
}

enum LocalWrite {
    Put(Entity),
    Delete(String),
}
