//! Queued write actions.
//!
//! One variant per kind of remote write, each carrying its own typed payload.
//! There is no "unknown action" case to handle at drain time.

use offsync_types::{Entity, EntityKind, Fields};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A write waiting to be pushed to the remote authority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SyncAction {
    /// `POST /{kind}` with the full entity.
    CreateEntity { kind: EntityKind, entity: Entity },
    /// `PUT /{kind}/{id}` with the resolver's merged payload.
    UpdateEntity {
        kind: EntityKind,
        id: String,
        /// Only the fields the user touched.
        changes: Fields,
        /// The local copy as it was before the edit, used as the merge baseline.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        base: Option<Entity>,
    },
    /// `DELETE /{kind}/{id}`.
    DeleteEntity { kind: EntityKind, id: String },
    /// `POST /{kind}/{id}/upload` with bytes read back from the blob cache.
    UploadDocument(DocumentUpload),
    /// `DELETE /{kind}/{id}` on a document record.
    DeleteDocument { kind: EntityKind, id: String },
}

/// Payload of a queued document upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentUpload {
    pub kind: EntityKind,
    pub id: String,
    /// Blob cache key the bytes were stored under.
    pub source_key: String,
    pub filename: String,
    pub mime_type: String,
    #[serde(default)]
    pub metadata: Fields,
}

impl SyncAction {
    /// Entity kind the action targets.
    pub fn kind(&self) -> &EntityKind {
        match self {
            SyncAction::CreateEntity { kind, .. }
            | SyncAction::UpdateEntity { kind, .. }
            | SyncAction::DeleteEntity { kind, .. }
            | SyncAction::DeleteDocument { kind, .. } => kind,
            SyncAction::UploadDocument(upload) => &upload.kind,
        }
    }

    /// Id of the entity the action targets.
    pub fn entity_id(&self) -> &str {
        match self {
            SyncAction::CreateEntity { entity, .. } => &entity.id,
            SyncAction::UpdateEntity { id, .. }
            | SyncAction::DeleteEntity { id, .. }
            | SyncAction::DeleteDocument { id, .. } => id,
            SyncAction::UploadDocument(upload) => &upload.id,
        }
    }

    /// Short verb used in logs and reports.
    pub fn verb(&self) -> &'static str {
        match self {
            SyncAction::CreateEntity { .. } => "create",
            SyncAction::UpdateEntity { .. } => "update",
            SyncAction::DeleteEntity { .. } => "delete",
            SyncAction::UploadDocument(_) => "upload",
            SyncAction::DeleteDocument { .. } => "delete-document",
        }
    }

    /// Points the action at `new_id` if it currently targets `(kind, old_id)`.
    /// Returns whether anything changed.
    pub fn rewrite_entity_id(&mut self, kind: &EntityKind, old_id: &str, new_id: &str) -> bool {
        if self.kind() != kind || self.entity_id() != old_id {
            return false;
        }
        match self {
            SyncAction::CreateEntity { entity, .. } => entity.id = new_id.to_string(),
            SyncAction::UpdateEntity { id, base, .. } => {
                *id = new_id.to_string();
                if let Some(base) = base {
                    base.id = new_id.to_string();
                }
            }
            SyncAction::DeleteEntity { id, .. } | SyncAction::DeleteDocument { id, .. } => {
                *id = new_id.to_string();
            }
            SyncAction::UploadDocument(upload) => upload.id = new_id.to_string(),
        }
        true
    }
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.verb(), self.kind(), self.entity_id())
    }
}
