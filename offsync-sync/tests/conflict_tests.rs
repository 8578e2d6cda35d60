use offsync_sync::{ConflictResolution, ConflictStrategy, resolve};
use offsync_types::Fields;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

fn fields(value: Value) -> Fields {
    match value {
        Value::Object(map) => map,
        _ => panic!("expected an object"),
    }
}

// ── Last write wins ─────────────────────────────────────────────

#[test]
fn last_write_wins_overlays_changes_on_remote() {
    let local = fields(json!({"name": "A"}));
    let remote = fields(json!({"name": "B", "location": "X"}));
    let changes = fields(json!({"name": "A"}));

    let resolved = resolve(
        Some(&local),
        &remote,
        &changes,
        &ConflictResolution::default(),
    );
    assert_eq!(resolved.payload, fields(json!({"name": "A", "location": "X"})));
    assert!(resolved.conflicts.is_empty());
}

#[test]
fn last_write_wins_ignores_missing_local() {
    let remote = fields(json!({"name": "B", "deck": 2}));
    let changes = fields(json!({"deck": 3}));

    let resolved = resolve(None, &remote, &changes, &ConflictResolution::default());
    assert_eq!(resolved.payload, fields(json!({"name": "B", "deck": 3})));
}

// ── Merge ───────────────────────────────────────────────────────

#[test]
fn merge_applies_change_when_remote_has_not_drifted() {
    let local = fields(json!({"model": "A"}));
    let remote = fields(json!({"model": "A", "location": "Deck 1"}));
    let changes = fields(json!({"model": "B"}));

    let resolved = resolve(
        Some(&local),
        &remote,
        &changes,
        &ConflictResolution::new(ConflictStrategy::Merge),
    );
    assert_eq!(
        resolved.payload,
        fields(json!({"model": "B", "location": "Deck 1"}))
    );
    assert!(resolved.conflicts.is_empty());
}

#[test]
fn merge_applies_fields_the_remote_lacks() {
    let local = fields(json!({}));
    let remote = fields(json!({"model": "A"}));
    let changes = fields(json!({"serial": "S-1"}));

    let resolved = resolve(
        Some(&local),
        &remote,
        &changes,
        &ConflictResolution::new(ConflictStrategy::Merge),
    );
    assert_eq!(resolved.payload, fields(json!({"model": "A", "serial": "S-1"})));
    assert!(resolved.conflicts.is_empty());
}

#[test]
fn merge_keeps_local_change_on_genuine_conflict() {
    let local = fields(json!({"model": "A", "location": "Deck 1"}));
    let remote = fields(json!({"model": "C", "location": "Deck 1"}));
    let changes = fields(json!({"model": "B", "location": "Deck 2"}));

    let resolved = resolve(
        Some(&local),
        &remote,
        &changes,
        &ConflictResolution::new(ConflictStrategy::Merge),
    );
    assert_eq!(
        resolved.payload,
        fields(json!({"model": "B", "location": "Deck 2"}))
    );
    assert_eq!(resolved.conflicts, vec!["model".to_string()]);
}

#[test]
fn merge_does_not_flag_identical_values() {
    let local = fields(json!({"model": "A"}));
    let remote = fields(json!({"model": "B"}));
    let changes = fields(json!({"model": "B"}));

    let resolved = resolve(
        Some(&local),
        &remote,
        &changes,
        &ConflictResolution::new(ConflictStrategy::Merge),
    );
    assert_eq!(resolved.payload, fields(json!({"model": "B"})));
    assert!(resolved.conflicts.is_empty());
}

#[test]
fn merge_resolver_decides_only_conflicting_fields() {
    let local = fields(json!({"model": "A", "location": "Deck 1"}));
    let remote = fields(json!({"model": "C", "location": "Deck 1"}));
    let changes = fields(json!({"model": "B", "location": "Deck 2"}));

    let resolution = ConflictResolution::new(ConflictStrategy::Merge).with_resolver(|input| {
        assert_eq!(input.changes.len(), 1);
        let mut decided = Fields::new();
        decided.insert("model".into(), input.remote["model"].clone());
        // Not conflicting, must be ignored.
        decided.insert("location".into(), json!("Hold"));
        decided
    });

    let resolved = resolve(Some(&local), &remote, &changes, &resolution);
    assert_eq!(
        resolved.payload,
        fields(json!({"model": "C", "location": "Deck 2"}))
    );
    assert_eq!(resolved.conflicts, vec!["model".to_string()]);
}

#[test]
fn merge_without_local_treats_remote_fields_as_drifted() {
    let remote = fields(json!({"model": "C"}));
    let changes = fields(json!({"model": "B"}));

    let resolved = resolve(
        None,
        &remote,
        &changes,
        &ConflictResolution::new(ConflictStrategy::Merge),
    );
    assert_eq!(resolved.payload, fields(json!({"model": "B"})));
    assert_eq!(resolved.conflicts, vec!["model".to_string()]);
}

// ── Manual ──────────────────────────────────────────────────────

#[test]
fn manual_without_resolver_passes_changes_through() {
    let local = fields(json!({"name": "A"}));
    let remote = fields(json!({"name": "B", "location": "X"}));
    let changes = fields(json!({"name": "C"}));

    let resolved = resolve(
        Some(&local),
        &remote,
        &changes,
        &ConflictResolution::new(ConflictStrategy::Manual),
    );
    assert_eq!(resolved.payload, changes);
}

#[test]
fn manual_resolver_receives_all_inputs() {
    let local = fields(json!({"count": 1}));
    let remote = fields(json!({"count": 5}));
    let changes = fields(json!({"count": 2}));

    let resolution = ConflictResolution::new(ConflictStrategy::Manual).with_resolver(|input| {
        let base = input.local.and_then(|l| l["count"].as_i64()).unwrap_or(0);
        let theirs = input.remote["count"].as_i64().unwrap_or(0);
        let ours = input.changes["count"].as_i64().unwrap_or(0);
        let mut out = Fields::new();
        out.insert("count".into(), json!(theirs + ours - base));
        out
    });

    let resolved = resolve(Some(&local), &remote, &changes, &resolution);
    assert_eq!(resolved.payload, fields(json!({"count": 6})));
}

#[test]
fn resolution_is_deterministic() {
    let local = fields(json!({"a": 1, "b": 1}));
    let remote = fields(json!({"a": 2, "b": 1, "c": 0}));
    let changes = fields(json!({"a": 3, "b": 4}));

    for strategy in [
        ConflictStrategy::LastWriteWins,
        ConflictStrategy::Merge,
        ConflictStrategy::Manual,
    ] {
        let resolution = ConflictResolution::new(strategy);
        let first = resolve(Some(&local), &remote, &changes, &resolution);
        let second = resolve(Some(&local), &remote, &changes, &resolution);
        assert_eq!(first, second, "{strategy}");
    }
}

// ── Strategy ────────────────────────────────────────────────────

#[test]
fn strategy_default_and_serde() {
    assert_eq!(ConflictStrategy::default(), ConflictStrategy::LastWriteWins);
    assert_eq!(
        serde_json::to_string(&ConflictStrategy::LastWriteWins).unwrap(),
        "\"last-write-wins\""
    );
    let parsed: ConflictStrategy = serde_json::from_str("\"merge\"").unwrap();
    assert_eq!(parsed, ConflictStrategy::Merge);
    assert_eq!(ConflictStrategy::Manual.to_string(), "manual");
}

#[test]
fn resolution_debug_hides_resolver() {
    let resolution =
        ConflictResolution::new(ConflictStrategy::Manual).with_resolver(|input| input.changes.clone());
    let debug = format!("{resolution:?}");
    assert!(debug.contains("Manual"));
    assert!(debug.contains("<fn>"));
}
