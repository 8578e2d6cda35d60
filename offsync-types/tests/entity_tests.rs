use offsync_types::{Entity, EntityKind, Fields, checksum};
use pretty_assertions::assert_eq;
use serde_json::json;

fn fields(value: serde_json::Value) -> Fields {
    value.as_object().cloned().unwrap()
}

#[test]
fn entity_kind_validation() {
    assert!(EntityKind::new("equipment").is_ok());
    assert!(EntityKind::new("").is_err());
    assert!(EntityKind::new("a/b").is_err());
    assert!(EntityKind::new(" padded").is_err());
}

#[test]
fn entity_kind_deserialize_validates() {
    let ok: EntityKind = serde_json::from_str("\"documents\"").unwrap();
    assert_eq!(ok.as_str(), "documents");
    assert!(serde_json::from_str::<EntityKind>("\"x/y\"").is_err());
}

#[test]
fn entity_parses_remote_shape() {
    let entity = Entity::from_value(json!({
        "id": "eq-1",
        "version": 4,
        "updatedAt": "2024-03-01T10:00:00Z",
        "name": "Pump",
        "location": "Deck 1"
    }))
    .unwrap();

    assert_eq!(entity.id, "eq-1");
    assert_eq!(entity.version, 4);
    assert!(entity.updated_at.is_some());
    assert_eq!(entity.get_str("name"), Some("Pump"));
    assert_eq!(entity.fields.len(), 2);
}

#[test]
fn entity_requires_id() {
    assert!(Entity::from_value(json!({"name": "no id"})).is_err());
    assert!(Entity::from_value(json!({"id": ""})).is_err());
    assert!(Entity::from_value(json!({"id": 7})).is_err());
}

#[test]
fn entity_version_defaults_to_zero() {
    let entity = Entity::from_value(json!({"id": "a"})).unwrap();
    assert_eq!(entity.version, 0);
    assert!(entity.updated_at.is_none());
}

#[test]
fn to_fields_includes_engine_fields() {
    let entity = Entity::new("a").with_field("name", "A");
    let map = entity.to_fields();
    assert_eq!(map.get("id"), Some(&json!("a")));
    assert_eq!(map.get("version"), Some(&json!(0)));
    assert_eq!(map.get("name"), Some(&json!("A")));
    assert!(!map.contains_key("updatedAt"));
}

#[test]
fn apply_overwrites_but_keeps_id() {
    let mut entity = Entity::new("a").with_field("name", "A").with_field("model", "X");
    entity.apply(&fields(json!({"id": "b", "name": "B", "version": 3})));

    assert_eq!(entity.id, "a");
    assert_eq!(entity.version, 3);
    assert_eq!(entity.get_str("name"), Some("B"));
    assert_eq!(entity.get_str("model"), Some("X"));
}

#[test]
fn checksum_ignores_key_insertion_order() {
    let a = json!({"b": 1, "a": 2});
    let mut map = serde_json::Map::new();
    map.insert("a".into(), json!(2));
    map.insert("b".into(), json!(1));
    assert_eq!(checksum(&a), checksum(&serde_json::Value::Object(map)));
    assert_eq!(checksum(&a).len(), 64);
}

#[test]
fn checksum_changes_with_content() {
    let a = Entity::new("a").with_field("name", "A");
    let b = Entity::new("a").with_field("name", "B");
    assert_ne!(a.checksum(), b.checksum());
}
