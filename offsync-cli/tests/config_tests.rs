use offsync_cli::{AppConfig, Engine};
use offsync_sync::{ConflictStrategy, SkipReason};
use offsync_types::EntityKind;
use serde_json::json;
use std::fs;

#[test]
fn default_config() {
    let cfg = AppConfig::load_or_default(None).unwrap();
    assert_eq!(cfg, AppConfig::default());
    assert_eq!(cfg.sync.auto_sync_interval_secs, 30);
    assert_eq!(cfg.sync.document_ttl_secs, 7 * 24 * 60 * 60);
    assert!(cfg.blob_cache.max_total_bytes.is_none());
}

#[test]
fn partial_config_file_fills_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("offsync.json");
    fs::write(
        &path,
        json!({
            "sync": {"strategy": "merge", "default_max_retries": 5},
            "remote": {"base_url": "https://api.example.com/api", "auth_token": "t"},
            "blob_cache": {"max_total_bytes": 1048576}
        })
        .to_string(),
    )
    .unwrap();

    let cfg = AppConfig::load(&path).unwrap();
    assert_eq!(cfg.sync.strategy, ConflictStrategy::Merge);
    assert_eq!(cfg.sync.default_max_retries, 5);
    assert!(cfg.sync.check_health);
    assert_eq!(cfg.remote.base_url, "https://api.example.com/api");
    assert_eq!(cfg.remote.auth_token.as_deref(), Some("t"));
    assert_eq!(cfg.remote.timeout_secs, 30);
    assert_eq!(cfg.blob_cache.max_total_bytes, Some(1_048_576));
}

#[test]
fn invalid_config_file_names_the_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.json");
    fs::write(&path, "{ not json").unwrap();

    let err = AppConfig::load(&path).unwrap_err();
    assert!(err.to_string().contains("broken.json"));
}

#[test]
fn missing_config_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(AppConfig::load(&dir.path().join("nope.json")).is_err());
}

#[tokio::test]
async fn engine_queues_writes_while_offline_and_persists_them() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("nested").join("field.db");
    let kind = EntityKind::new("equipment").unwrap();

    {
        let engine = Engine::open(&db, &AppConfig::default()).unwrap();
        engine.connectivity.set_online(false);

        let mut fields = serde_json::Map::new();
        fields.insert("id".into(), json!("e1"));
        let outcome = engine.writer.create(&kind, fields).await.unwrap();
        assert!(outcome.is_queued());

        let report = engine.orchestrator.sync_all().await.unwrap();
        assert_eq!(report.skipped, Some(SkipReason::Offline));
    }

    let reopened = Engine::open(&db, &AppConfig::default()).unwrap();
    assert_eq!(reopened.store().pending_count().unwrap(), 1);
    assert!(reopened.store().get_entity("equipment", "e1").unwrap().is_some());
}
