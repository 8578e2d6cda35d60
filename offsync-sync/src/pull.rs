//! Applying a remote listing to the local store.

use crate::report::PullSummary;
use offsync_storage::{LocalStore, StorageResult};
use offsync_types::{Entity, EntityKind};
use std::collections::HashSet;
use tracing::debug;

/// Makes the local copy of `kind` match `remote`, in one transaction.
///
/// Local entities absent from the listing are deleted, listed ones are
/// written with fresh sync metadata. Entities with queued operations are
/// left untouched either way so unsent local writes survive.
pub(crate) fn reconcile(
    store: &LocalStore,
    kind: &EntityKind,
    remote: &[Entity],
) -> StorageResult<PullSummary> {
    store.transaction(|tx| {
        let pending = tx.pending_entity_ids(kind.as_str())?;
        let listed: HashSet<&str> = remote.iter().map(|e| e.id.as_str()).collect();
        let mut summary = PullSummary::default();

        for id in tx.list_ids(kind.as_str())? {
            if listed.contains(id.as_str()) || pending.contains(&id) {
                continue;
            }
            tx.delete(kind.as_str(), &id)?;
            tx.delete_sync_metadata(kind.as_str(), &id)?;
            summary.deleted += 1;
        }

        for entity in remote {
            if pending.contains(&entity.id) {
                summary.preserved += 1;
                continue;
            }
            tx.put_entity(kind.as_str(), entity)?;
            tx.update_sync_metadata(
                kind.as_str(),
                &entity.id,
                entity.version,
                Some(&entity.checksum()),
            )?;
            summary.upserted += 1;
        }

        debug!(
            "Reconciled {}: {} upserted, {} deleted, {} preserved",
            kind, summary.upserted, summary.deleted, summary.preserved
        );
        Ok(summary)
    })
}
