use offsync_types::OperationId;
use std::collections::HashSet;

#[test]
fn operation_ids_are_unique() {
    let ids: HashSet<OperationId> = (0..1000).map(|_| OperationId::new()).collect();
    assert_eq!(ids.len(), 1000);
}

#[test]
fn operation_ids_sort_by_creation() {
    let a = OperationId::new();
    std::thread::sleep(std::time::Duration::from_millis(2));
    let b = OperationId::new();
    assert!(a < b);
}

#[test]
fn operation_id_display_parse_roundtrip() {
    let id = OperationId::new();
    let parsed: OperationId = id.to_string().parse().unwrap();
    assert_eq!(id, parsed);
    assert_eq!(OperationId::parse(&id.to_string()).unwrap(), id);
}

#[test]
fn operation_id_parse_rejects_garbage() {
    assert!(OperationId::parse("not-a-uuid").is_err());
}

#[test]
fn operation_id_serializes_transparently() {
    let id = OperationId::new();
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, format!("\"{id}\""));
}
