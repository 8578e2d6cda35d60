//! REST implementation of [`RemoteService`].
//!
//! Status mapping: 2xx is success, 408/429/5xx and transport failures are
//! [`SyncError::Network`] (retried), every other 4xx is
//! [`SyncError::Validation`] (dropped).

use crate::config::RemoteConfig;
use crate::error::{SyncError, SyncResult};
use crate::remote::{RemoteService, UploadRequest, UploadedDocument};
use async_trait::async_trait;
use offsync_types::{Entity, EntityKind, Fields};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Talks to the remote authority over HTTP.
pub struct HttpRemote {
    config: RemoteConfig,
    client: Client,
}

impl HttpRemote {
    pub fn new(config: RemoteConfig) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SyncError::Network(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    fn url(&self, segments: &[&str]) -> String {
        let mut url = self.config.base_url.trim_end_matches('/').to_string();
        for segment in segments {
            url.push('/');
            url.push_str(&urlencoding::encode(segment));
        }
        url
    }

    fn request(&self, method: Method, segments: &[&str]) -> RequestBuilder {
        let builder = self.client.request(method, self.url(segments));
        match &self.config.auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder, what: &str) -> SyncResult<Response> {
        let response = builder
            .send()
            .await
            .map_err(|e| SyncError::Network(format!("{what} failed: {e}")))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        debug!("{} returned {}: {}", what, status, body);
        Err(status_error(status, body))
    }

    async fn send_entity(&self, builder: RequestBuilder, what: &str) -> SyncResult<Entity> {
        let value: Value = self
            .send(builder, what)
            .await?
            .json()
            .await
            .map_err(|e| SyncError::InvalidResponse(format!("{what}: {e}")))?;
        Entity::from_value(unwrap_data(value))
            .map_err(|e| SyncError::InvalidResponse(format!("{what}: {e}")))
    }
}

/// Maps a non-2xx status onto the retry classification.
fn status_error(status: StatusCode, body: String) -> SyncError {
    let retryable = !status.is_client_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS;
    if retryable {
        SyncError::Network(format!("HTTP {status}: {body}"))
    } else {
        SyncError::Validation {
            status: status.as_u16(),
            message: body,
        }
    }
}

/// Accepts both a bare payload and one wrapped as `{"data": ...}`.
fn unwrap_data(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.len() == 1 && map.contains_key("data") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

#[async_trait]
impl RemoteService for HttpRemote {
    async fn health(&self) -> SyncResult<bool> {
        let result = self
            .request(Method::GET, &["health"])
            .timeout(Duration::from_secs(self.config.health_timeout_secs))
            .send()
            .await;
        match result {
            Ok(response) => Ok(response.status().is_success()),
            Err(e) => {
                debug!("Health check failed: {}", e);
                Ok(false)
            }
        }
    }

    async fn create(
        &self,
        kind: &EntityKind,
        entity: &Fields,
        idempotency_key: &str,
    ) -> SyncResult<Entity> {
        let builder = self
            .request(Method::POST, &[kind.as_str()])
            .header(IDEMPOTENCY_HEADER, idempotency_key)
            .json(entity);
        self.send_entity(builder, "create").await
    }

    async fn fetch(&self, kind: &EntityKind, id: &str) -> SyncResult<Entity> {
        let builder = self.request(Method::GET, &[kind.as_str(), id]);
        self.send_entity(builder, "fetch").await
    }

    async fn fetch_scope(&self, scope: &str, kind: &EntityKind) -> SyncResult<Vec<Entity>> {
        let mut segments: Vec<&str> = scope.split('/').filter(|s| !s.is_empty()).collect();
        segments.push(kind.as_str());
        let value: Value = self
            .send(self.request(Method::GET, &segments), "fetch scope")
            .await?
            .json()
            .await
            .map_err(|e| SyncError::InvalidResponse(format!("fetch scope: {e}")))?;
        match unwrap_data(value) {
            Value::Array(items) => items
                .into_iter()
                .map(|item| {
                    Entity::from_value(item)
                        .map_err(|e| SyncError::InvalidResponse(format!("fetch scope: {e}")))
                })
                .collect(),
            other => Err(SyncError::InvalidResponse(format!(
                "fetch scope: expected an array, got {other}"
            ))),
        }
    }

    async fn update(&self, kind: &EntityKind, id: &str, payload: &Fields) -> SyncResult<Entity> {
        let builder = self.request(Method::PUT, &[kind.as_str(), id]).json(payload);
        self.send_entity(builder, "update").await
    }

    async fn delete(&self, kind: &EntityKind, id: &str) -> SyncResult<()> {
        self.send(self.request(Method::DELETE, &[kind.as_str(), id]), "delete")
            .await?;
        Ok(())
    }

    async fn upload(
        &self,
        kind: &EntityKind,
        id: &str,
        document: UploadRequest,
        idempotency_key: &str,
    ) -> SyncResult<UploadedDocument> {
        let size = document.bytes.len();
        let file = Part::bytes(document.bytes)
            .file_name(document.filename)
            .mime_str(&document.mime_type)
            .map_err(|e| SyncError::InvalidRequest(format!("mime type: {e}")))?;
        let form = Form::new()
            .part("file", file)
            .text("metadata", Value::Object(document.metadata).to_string());

        let builder = self
            .request(Method::POST, &[kind.as_str(), id, "upload"])
            .header(IDEMPOTENCY_HEADER, idempotency_key)
            .multipart(form);
        let value: Value = self
            .send(builder, "upload")
            .await?
            .json()
            .await
            .map_err(|e| SyncError::InvalidResponse(format!("upload: {e}")))?;
        debug!("Uploaded {} bytes for {}/{}", size, kind, id);
        serde_json::from_value(unwrap_data(value))
            .map_err(|e| SyncError::InvalidResponse(format!("upload: {e}")))
    }
}
