use offsync_sync::{HttpRemote, RemoteConfig, RemoteService, SyncError, UploadRequest};
use offsync_types::{EntityKind, Fields};
use serde_json::{Value, json};
use wiremock::matchers::{bearer_token, body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn remote_for(server: &MockServer) -> HttpRemote {
    HttpRemote::new(RemoteConfig {
        base_url: format!("{}/api/", server.uri()),
        ..RemoteConfig::default()
    })
    .unwrap()
}

fn kind(name: &str) -> EntityKind {
    EntityKind::new(name).unwrap()
}

fn fields(value: Value) -> Fields {
    match value {
        Value::Object(map) => map,
        _ => panic!("expected an object"),
    }
}

// ── Config ──────────────────────────────────────────────────────

#[test]
fn remote_config_default() {
    let cfg = RemoteConfig::default();
    assert_eq!(cfg.base_url, "http://localhost:3000/api");
    assert_eq!(cfg.timeout_secs, 30);
    assert_eq!(cfg.health_timeout_secs, 5);
    assert!(cfg.auth_token.is_none());
}

#[test]
fn remote_config_partial_json_uses_defaults() {
    let cfg: RemoteConfig =
        serde_json::from_str(r#"{"base_url": "https://api.example.com"}"#).unwrap();
    assert_eq!(cfg.base_url, "https://api.example.com");
    assert_eq!(cfg.timeout_secs, 30);
}

// ── Health ──────────────────────────────────────────────────────

#[tokio::test]
async fn health_ok() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    assert!(remote_for(&server).health().await.unwrap());
}

#[tokio::test]
async fn health_server_error_is_unhealthy() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/health"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    assert!(!remote_for(&server).health().await.unwrap());
}

#[tokio::test]
async fn health_unreachable_is_unhealthy() {
    let remote = HttpRemote::new(RemoteConfig {
        base_url: "http://127.0.0.1:1/api".to_string(),
        health_timeout_secs: 1,
        ..RemoteConfig::default()
    })
    .unwrap();
    assert!(!remote.health().await.unwrap());
}

// ── Entities ────────────────────────────────────────────────────

#[tokio::test]
async fn create_posts_entity_with_auth_and_idempotency_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/equipment"))
        .and(bearer_token("secret"))
        .and(header("Idempotency-Key", "op-1"))
        .and(body_json(json!({"id": "tmp-1", "version": 0, "name": "Pump"})))
        .respond_with(
            ResponseTemplate::new(201)
                .set_body_json(json!({"id": "srv-9", "version": 1, "name": "Pump"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let remote = HttpRemote::new(RemoteConfig {
        base_url: format!("{}/api", server.uri()),
        auth_token: Some("secret".to_string()),
        ..RemoteConfig::default()
    })
    .unwrap();
    let created = remote
        .create(
            &kind("equipment"),
            &fields(json!({"id": "tmp-1", "version": 0, "name": "Pump"})),
            "op-1",
        )
        .await
        .unwrap();
    assert_eq!(created.id, "srv-9");
    assert_eq!(created.version, 1);
    assert_eq!(created.get_str("name"), Some("Pump"));
}

#[tokio::test]
async fn fetch_unwraps_data_envelope() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/equipment/e1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"data": {"id": "e1", "model": "X"}})),
        )
        .mount(&server)
        .await;

    let entity = remote_for(&server)
        .fetch(&kind("equipment"), "e1")
        .await
        .unwrap();
    assert_eq!(entity.id, "e1");
    assert_eq!(entity.get_str("model"), Some("X"));
}

#[tokio::test]
async fn fetch_encodes_id_segment() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/equipment/a%2Fb"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "a/b"})))
        .expect(1)
        .mount(&server)
        .await;

    let entity = remote_for(&server)
        .fetch(&kind("equipment"), "a/b")
        .await
        .unwrap();
    assert_eq!(entity.id, "a/b");
}

#[tokio::test]
async fn fetch_without_id_is_invalid_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/equipment/e1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"model": "X"})))
        .mount(&server)
        .await;

    let err = remote_for(&server)
        .fetch(&kind("equipment"), "e1")
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::InvalidResponse(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn fetch_scope_lists_entities() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/vessels/v-1/equipment"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{"id": "e1"}, {"id": "e2"}])),
        )
        .mount(&server)
        .await;

    let listed = remote_for(&server)
        .fetch_scope("/vessels/v-1/", &kind("equipment"))
        .await
        .unwrap();
    let ids: Vec<_> = listed.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["e1", "e2"]);
}

#[tokio::test]
async fn fetch_scope_rejects_non_array() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/vessels/v-1/equipment"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"count": 2})))
        .mount(&server)
        .await;

    let err = remote_for(&server)
        .fetch_scope("vessels/v-1", &kind("equipment"))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::InvalidResponse(_)));
}

#[tokio::test]
async fn update_puts_payload() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/api/equipment/e1"))
        .and(body_json(json!({"model": "B"})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"id": "e1", "version": 4, "model": "B"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let updated = remote_for(&server)
        .update(&kind("equipment"), "e1", &fields(json!({"model": "B"})))
        .await
        .unwrap();
    assert_eq!(updated.version, 4);
}

#[tokio::test]
async fn delete_accepts_no_content() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/equipment/e1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    remote_for(&server)
        .delete(&kind("equipment"), "e1")
        .await
        .unwrap();
}

// ── Status classification ───────────────────────────────────────

async fn fetch_with_status(status: u16) -> SyncError {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/equipment/e1"))
        .respond_with(ResponseTemplate::new(status).set_body_string("nope"))
        .mount(&server)
        .await;

    remote_for(&server)
        .fetch(&kind("equipment"), "e1")
        .await
        .unwrap_err()
}

#[tokio::test]
async fn client_errors_are_validation_failures() {
    for status in [400, 401, 404, 409, 422] {
        let err = fetch_with_status(status).await;
        assert_eq!(err.status(), Some(status));
        assert!(!err.is_retryable(), "{status}");
        assert!(!err.is_fatal());
    }
}

#[tokio::test]
async fn timeouts_rate_limits_and_server_errors_are_retryable() {
    for status in [408, 429, 500, 502, 503] {
        let err = fetch_with_status(status).await;
        assert!(matches!(err, SyncError::Network(_)), "{status}");
        assert!(err.is_retryable());
    }
}

#[tokio::test]
async fn validation_message_carries_body() {
    let err = fetch_with_status(422).await;
    assert_eq!(err.to_string(), "remote rejected request (422): nope");
}

// ── Upload ──────────────────────────────────────────────────────

#[tokio::test]
async fn upload_sends_multipart_and_reads_file_url() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/documents/d1/upload"))
        .and(header("Idempotency-Key", "op-7"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"fileUrl": "https://cdn.example.com/d1.pdf", "size": 8})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let uploaded = remote_for(&server)
        .upload(
            &kind("documents"),
            "d1",
            UploadRequest {
                filename: "cert.pdf".to_string(),
                mime_type: "application/pdf".to_string(),
                bytes: b"%PDF-1.7".to_vec(),
                metadata: fields(json!({"category": "certificate"})),
            },
            "op-7",
        )
        .await
        .unwrap();
    assert_eq!(uploaded.file_url, "https://cdn.example.com/d1.pdf");
    assert_eq!(uploaded.extra.get("size"), Some(&json!(8)));

    let requests = server.received_requests().await.unwrap();
    let content_type = requests[0]
        .headers
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap();
    assert!(content_type.starts_with("multipart/form-data"));
    let body = String::from_utf8_lossy(&requests[0].body);
    assert!(body.contains("filename=\"cert.pdf\""));
    assert!(body.contains("%PDF-1.7"));
    assert!(body.contains("certificate"));
}

#[tokio::test]
async fn upload_accepts_url_alias() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/documents/d1/upload"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"url": "https://cdn.example.com/x"})),
        )
        .mount(&server)
        .await;

    let uploaded = remote_for(&server)
        .upload(
            &kind("documents"),
            "d1",
            UploadRequest {
                filename: "x.png".to_string(),
                mime_type: "image/png".to_string(),
                bytes: vec![1, 2, 3],
                metadata: Fields::new(),
            },
            "op-8",
        )
        .await
        .unwrap();
    assert_eq!(uploaded.file_url, "https://cdn.example.com/x");
}

#[tokio::test]
async fn upload_with_invalid_mime_type_is_rejected_locally() {
    let server = MockServer::start().await;
    let err = remote_for(&server)
        .upload(
            &kind("documents"),
            "d1",
            UploadRequest {
                filename: "x".to_string(),
                mime_type: "not a mime".to_string(),
                bytes: vec![],
                metadata: Fields::new(),
            },
            "op-9",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::InvalidRequest(_)));
    assert!(!err.is_retryable());
    assert!(server.received_requests().await.unwrap().is_empty());
}
