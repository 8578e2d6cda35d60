use offsync_storage::{DEFAULT_MAX_RETRIES, DocumentUpload, LocalStore, SyncAction};
use offsync_types::{Entity, EntityKind, Fields, OperationId};
use proptest::prelude::*;
use serde_json::json;

fn kind(name: &str) -> EntityKind {
    EntityKind::new(name).unwrap()
}

fn create(id: &str) -> SyncAction {
    SyncAction::CreateEntity {
        kind: kind("equipment"),
        entity: Entity::new(id).with_field("name", id),
    }
}

fn changes(value: serde_json::Value) -> Fields {
    value.as_object().cloned().unwrap()
}

#[test]
fn enqueue_sets_defaults() {
    let store = LocalStore::open_in_memory().unwrap();
    let id = store.enqueue(create("eq-1")).unwrap();

    let op = store.get_operation(&id).unwrap().unwrap();
    assert_eq!(op.retry_count, 0);
    assert_eq!(op.max_retries, DEFAULT_MAX_RETRIES);
    assert_eq!(op.action, create("eq-1"));
    assert!(op.created_at > 0);
}

#[test]
fn list_pending_preserves_insertion_order() {
    let store = LocalStore::open_in_memory().unwrap();
    store.enqueue(create("eq-1")).unwrap();
    store
        .enqueue(SyncAction::UpdateEntity {
            kind: kind("equipment"),
            id: "eq-2".into(),
            changes: changes(json!({"name": "Equipment 2 Updated"})),
            base: None,
        })
        .unwrap();
    store
        .enqueue(SyncAction::DeleteEntity {
            kind: kind("equipment"),
            id: "eq-3".into(),
        })
        .unwrap();

    let verbs: Vec<_> = store
        .list_pending()
        .unwrap()
        .iter()
        .map(|op| op.action.verb())
        .collect();
    assert_eq!(verbs, vec!["create", "update", "delete"]);
}

#[test]
fn record_failure_increments_and_saturates() {
    let store = LocalStore::open_in_memory().unwrap();
    let id = store.enqueue_with_retries(create("eq-1"), 3).unwrap();

    for expected in 1..=3 {
        let op = store.record_failure(&id).unwrap().unwrap();
        assert_eq!(op.retry_count, expected);
    }
    let op = store.record_failure(&id).unwrap().unwrap();
    assert_eq!(op.retry_count, 3);
    assert!(op.is_exhausted());
}

#[test]
fn enqueue_with_id_keeps_the_callers_id() {
    let store = LocalStore::open_in_memory().unwrap();
    let id = OperationId::new();
    let op = store
        .transaction(|tx| tx.enqueue_with_id(id, create("eq-1"), 5))
        .unwrap();
    assert_eq!(op.id, id);
    assert_eq!(store.list_pending().unwrap()[0].id, id);

    let duplicate = store.transaction(|tx| tx.enqueue_with_id(id, create("eq-2"), 5));
    assert!(duplicate.is_err());
    assert_eq!(store.pending_count().unwrap(), 1);
}

#[test]
fn record_failure_on_missing_operation() {
    let store = LocalStore::open_in_memory().unwrap();
    assert!(store.record_failure(&OperationId::new()).unwrap().is_none());
}

#[test]
fn remove_operation() {
    let store = LocalStore::open_in_memory().unwrap();
    let a = store.enqueue(create("a")).unwrap();
    let b = store.enqueue(create("b")).unwrap();

    assert!(store.remove_operation(&a).unwrap());
    assert!(!store.remove_operation(&a).unwrap());

    let pending = store.list_pending().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, b);
    assert_eq!(store.pending_count().unwrap(), 1);
}

#[test]
fn pending_entity_ids_by_kind() {
    let store = LocalStore::open_in_memory().unwrap();
    store.enqueue(create("a")).unwrap();
    store
        .enqueue(SyncAction::DeleteDocument {
            kind: kind("documents"),
            id: "d".into(),
        })
        .unwrap();

    let ids = store.pending_entity_ids("equipment").unwrap();
    assert!(ids.contains("a"));
    assert!(!ids.contains("d"));
    assert!(store.pending_entity_ids("documents").unwrap().contains("d"));
}

#[test]
fn rewrite_queued_entity_id_retargets_later_operations() {
    let store = LocalStore::open_in_memory().unwrap();
    store
        .enqueue(SyncAction::UpdateEntity {
            kind: kind("equipment"),
            id: "local-1".into(),
            changes: changes(json!({"name": "B"})),
            base: Some(Entity::new("local-1")),
        })
        .unwrap();
    store
        .enqueue(SyncAction::UpdateEntity {
            kind: kind("parts"),
            id: "local-1".into(),
            changes: Fields::new(),
            base: None,
        })
        .unwrap();

    let rewritten = store
        .transaction(|tx| tx.rewrite_queued_entity_id(&kind("equipment"), "local-1", "srv-9"))
        .unwrap();
    assert_eq!(rewritten, 1);

    let pending = store.list_pending().unwrap();
    match &pending[0].action {
        SyncAction::UpdateEntity { id, base, .. } => {
            assert_eq!(id, "srv-9");
            assert_eq!(base.as_ref().unwrap().id, "srv-9");
        }
        other => panic!("unexpected action {other:?}"),
    }
    assert_eq!(pending[1].action.entity_id(), "local-1");
    assert!(store.pending_entity_ids("equipment").unwrap().contains("srv-9"));
}

#[test]
fn upload_action_roundtrips_through_queue() {
    let store = LocalStore::open_in_memory().unwrap();
    let action = SyncAction::UploadDocument(DocumentUpload {
        kind: kind("documents"),
        id: "doc-1".into(),
        source_key: "local://documents/doc-1".into(),
        filename: "manual.pdf".into(),
        mime_type: "application/pdf".into(),
        metadata: changes(json!({"title": "Manual"})),
    });
    store.enqueue(action.clone()).unwrap();
    assert_eq!(store.list_pending().unwrap()[0].action, action);
    assert_eq!(action.to_string(), "upload documents/doc-1");
}

#[test]
fn queue_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.db");
    {
        let store = LocalStore::open(&path).unwrap();
        store.enqueue(create("a")).unwrap();
        store.enqueue(create("b")).unwrap();
    }
    let store = LocalStore::open(&path).unwrap();
    let ids: Vec<_> = store
        .list_pending()
        .unwrap()
        .into_iter()
        .map(|op| op.action.entity_id().to_string())
        .collect();
    assert_eq!(ids, vec!["a", "b"]);
}

#[test]
fn stats_count_queue() {
    let store = LocalStore::open_in_memory().unwrap();
    store.enqueue(create("a")).unwrap();
    store.put("equipment", "a", &json!({"id": "a"})).unwrap();
    let stats = store.stats().unwrap();
    assert_eq!(stats.total_entities, 1);
    assert_eq!(stats.pending_operations, 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn pending_order_matches_enqueue_order(ids in proptest::collection::vec("[a-z0-9]{1,8}", 1..40)) {
        let store = LocalStore::open_in_memory().unwrap();
        for id in &ids {
            store.enqueue(create(id)).unwrap();
        }
        let drained: Vec<String> = store
            .list_pending()
            .unwrap()
            .into_iter()
            .map(|op| op.action.entity_id().to_string())
            .collect();
        prop_assert_eq!(drained, ids);
    }
}
