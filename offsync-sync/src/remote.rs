//! The remote authority.
//!
//! The server owns the canonical copy of every entity. [`RemoteService`] is
//! the contract the orchestrator and offline writer talk to;
//! [`HttpRemote`](crate::HttpRemote) speaks it over REST.

use crate::error::SyncResult;
use async_trait::async_trait;
use offsync_types::{Entity, EntityKind, Fields};
use serde::{Deserialize, Serialize};

/// A document to upload.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadRequest {
    pub filename: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
    pub metadata: Fields,
}

/// The remote's answer to an upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedDocument {
    /// Where the remote now serves the file.
    #[serde(rename = "fileUrl", alias = "url")]
    pub file_url: String,
    #[serde(flatten)]
    pub extra: Fields,
}

/// Operations the remote authority supports.
///
/// Non-idempotent calls carry an idempotency key so a retried request can be
/// recognised by the server.
#[async_trait]
pub trait RemoteService: Send + Sync {
    /// Returns whether the remote reports itself healthy.
    async fn health(&self) -> SyncResult<bool>;

    /// `POST /{kind}`. The returned entity may carry a server-assigned id.
    async fn create(
        &self,
        kind: &EntityKind,
        entity: &Fields,
        idempotency_key: &str,
    ) -> SyncResult<Entity>;

    /// `GET /{kind}/{id}`.
    async fn fetch(&self, kind: &EntityKind, id: &str) -> SyncResult<Entity>;

    /// `GET /{scope}/{kind}`: every entity of a kind in a working set.
    async fn fetch_scope(&self, scope: &str, kind: &EntityKind) -> SyncResult<Vec<Entity>>;

    /// `PUT /{kind}/{id}`.
    async fn update(&self, kind: &EntityKind, id: &str, payload: &Fields) -> SyncResult<Entity>;

    /// `DELETE /{kind}/{id}`.
    async fn delete(&self, kind: &EntityKind, id: &str) -> SyncResult<()>;

    /// `POST /{kind}/{id}/upload`.
    async fn upload(
        &self,
        kind: &EntityKind,
        id: &str,
        document: UploadRequest,
        idempotency_key: &str,
    ) -> SyncResult<UploadedDocument>;
}

/// In-memory remote for tests.
pub mod mock {
    use super::*;
    use crate::error::SyncError;
    use std::collections::{BTreeMap, HashMap, HashSet};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Mutex, MutexGuard, PoisonError};
    use std::time::Duration;

    /// A request the mock received.
    #[derive(Debug, Clone, PartialEq)]
    pub enum RemoteCall {
        Health,
        Create { kind: String, id: String },
        Fetch { kind: String, id: String },
        FetchScope { scope: String, kind: String },
        Update { kind: String, id: String, payload: Fields },
        Delete { kind: String, id: String },
        Upload { kind: String, id: String, filename: String, size: usize },
    }

    impl RemoteCall {
        /// Whether the call writes to the remote.
        pub fn is_write(&self) -> bool {
            matches!(
                self,
                RemoteCall::Create { .. }
                    | RemoteCall::Update { .. }
                    | RemoteCall::Delete { .. }
                    | RemoteCall::Upload { .. }
            )
        }
    }

    /// A scripted failure.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum MockFailure {
        Network,
        Status(u16),
    }

    impl MockFailure {
        fn to_error(self) -> SyncError {
            match self {
                MockFailure::Network => SyncError::Network("connection reset".to_string()),
                MockFailure::Status(status @ (408 | 429)) => {
                    SyncError::Network(format!("HTTP {status}"))
                }
                MockFailure::Status(status @ 400..=499) => SyncError::Validation {
                    status,
                    message: "rejected by mock".to_string(),
                },
                MockFailure::Status(status) => SyncError::Network(format!("HTTP {status}")),
            }
        }
    }

    #[derive(Default)]
    struct State {
        entities: BTreeMap<(String, String), Entity>,
        calls: Vec<RemoteCall>,
        /// Failures keyed by 1-based index among non-health calls.
        scripted: HashMap<usize, MockFailure>,
        failing: Option<MockFailure>,
        /// Requests (same numbering) that commit but answer with a network error.
        lost_responses: HashSet<usize>,
        /// Idempotency keys in the order they arrived.
        keys: Vec<String>,
        /// Entities created per idempotency key.
        created_by_key: HashMap<String, Entity>,
        id_prefix: Option<String>,
        latency: Option<Duration>,
    }

    /// A remote that keeps entities in memory and records every call.
    #[derive(Default)]
    pub struct MockRemote {
        state: Mutex<State>,
        unhealthy: AtomicBool,
        requests: AtomicUsize,
        uploads: AtomicUsize,
    }

    impl MockRemote {
        pub fn new() -> Self {
            Self::default()
        }

        fn state(&self) -> MutexGuard<'_, State> {
            self.state.lock().unwrap_or_else(PoisonError::into_inner)
        }

        /// Seeds a remote entity.
        pub fn insert(&self, kind: &str, entity: Entity) {
            self.state()
                .entities
                .insert((kind.to_string(), entity.id.clone()), entity);
        }

        pub fn entity(&self, kind: &str, id: &str) -> Option<Entity> {
            self.state()
                .entities
                .get(&(kind.to_string(), id.to_string()))
                .cloned()
        }

        pub fn entities(&self, kind: &str) -> Vec<Entity> {
            self.state()
                .entities
                .iter()
                .filter(|((k, _), _)| k == kind)
                .map(|(_, e)| e.clone())
                .collect()
        }

        /// Removes an entity behind the client's back.
        pub fn remove(&self, kind: &str, id: &str) {
            self.state()
                .entities
                .remove(&(kind.to_string(), id.to_string()));
        }

        pub fn calls(&self) -> Vec<RemoteCall> {
            self.state().calls.clone()
        }

        pub fn write_calls(&self) -> Vec<RemoteCall> {
            self.state()
                .calls
                .iter()
                .filter(|c| c.is_write())
                .cloned()
                .collect()
        }

        /// Fails the `n`th non-health request (1-based) once.
        pub fn fail_request(&self, n: usize, failure: MockFailure) {
            self.state().scripted.insert(n, failure);
        }

        /// Lets the `n`th non-health request (1-based) take effect, then
        /// reports a network error as if the response never arrived.
        pub fn lose_response(&self, n: usize) {
            self.state().lost_responses.insert(n);
        }

        /// Idempotency keys received by `create` and `upload`, in order.
        pub fn idempotency_keys(&self) -> Vec<String> {
            self.state().keys.clone()
        }

        /// Fails every non-health request until cleared with `None`.
        pub fn set_failing(&self, failure: Option<MockFailure>) {
            self.state().failing = failure;
        }

        pub fn set_healthy(&self, healthy: bool) {
            self.unhealthy.store(!healthy, Ordering::SeqCst);
        }

        /// Makes `create` assign `{prefix}{n}` instead of keeping the client id.
        pub fn assign_ids(&self, prefix: impl Into<String>) {
            self.state().id_prefix = Some(prefix.into());
        }

        /// Delays every request.
        pub fn set_latency(&self, latency: Duration) {
            self.state().latency = Some(latency);
        }

        /// Records a call and applies scripted failures. Returns the
        /// request's number, or 0 for health probes.
        async fn begin(&self, call: RemoteCall) -> SyncResult<usize> {
            let latency = self.state().latency;
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }
            let mut state = self.state();
            let is_health = call == RemoteCall::Health;
            state.calls.push(call);
            if is_health {
                return Ok(0);
            }
            let n = self.requests.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(failure) = state.scripted.remove(&n).or(state.failing) {
                return Err(failure.to_error());
            }
            Ok(n)
        }

        /// Fails a request that already took effect if its response is
        /// scripted to be lost.
        fn respond<T>(&self, n: usize, value: T) -> SyncResult<T> {
            if self.state().lost_responses.remove(&n) {
                return Err(SyncError::Network("response lost".to_string()));
            }
            Ok(value)
        }

        fn not_found(kind: &EntityKind, id: &str) -> SyncError {
            SyncError::Validation {
                status: 404,
                message: format!("{kind}/{id} not found"),
            }
        }
    }

    #[async_trait]
    impl RemoteService for MockRemote {
        async fn health(&self) -> SyncResult<bool> {
            self.begin(RemoteCall::Health).await?;
            Ok(!self.unhealthy.load(Ordering::SeqCst))
        }

        async fn create(
            &self,
            kind: &EntityKind,
            entity: &Fields,
            idempotency_key: &str,
        ) -> SyncResult<Entity> {
            let client_id = entity
                .get("id")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let n = self
                .begin(RemoteCall::Create {
                    kind: kind.to_string(),
                    id: client_id.clone(),
                })
                .await?;

            let created = {
                let mut state = self.state();
                state.keys.push(idempotency_key.to_string());
                match state.created_by_key.get(idempotency_key) {
                    Some(existing) => existing.clone(),
                    None => {
                        let mut created = Entity::from_fields(entity.clone())?;
                        if let Some(prefix) = &state.id_prefix {
                            created.id = format!("{prefix}{}", state.entities.len() + 1);
                        }
                        created.version = 1;
                        state
                            .entities
                            .insert((kind.to_string(), created.id.clone()), created.clone());
                        state
                            .created_by_key
                            .insert(idempotency_key.to_string(), created.clone());
                        created
                    }
                }
            };
            self.respond(n, created)
        }

        async fn fetch(&self, kind: &EntityKind, id: &str) -> SyncResult<Entity> {
            self.begin(RemoteCall::Fetch {
                kind: kind.to_string(),
                id: id.to_string(),
            })
            .await?;
            self.entity(kind.as_str(), id)
                .ok_or_else(|| Self::not_found(kind, id))
        }

        async fn fetch_scope(&self, scope: &str, kind: &EntityKind) -> SyncResult<Vec<Entity>> {
            self.begin(RemoteCall::FetchScope {
                scope: scope.to_string(),
                kind: kind.to_string(),
            })
            .await?;
            Ok(self.entities(kind.as_str()))
        }

        async fn update(
            &self,
            kind: &EntityKind,
            id: &str,
            payload: &Fields,
        ) -> SyncResult<Entity> {
            self.begin(RemoteCall::Update {
                kind: kind.to_string(),
                id: id.to_string(),
                payload: payload.clone(),
            })
            .await?;
            let mut state = self.state();
            let key = (kind.to_string(), id.to_string());
            let current = state
                .entities
                .get_mut(&key)
                .ok_or_else(|| Self::not_found(kind, id))?;
            let version = current.version + 1;
            current.apply(payload);
            current.version = version;
            Ok(current.clone())
        }

        async fn delete(&self, kind: &EntityKind, id: &str) -> SyncResult<()> {
            self.begin(RemoteCall::Delete {
                kind: kind.to_string(),
                id: id.to_string(),
            })
            .await?;
            self.state()
                .entities
                .remove(&(kind.to_string(), id.to_string()))
                .map(|_| ())
                .ok_or_else(|| Self::not_found(kind, id))
        }

        async fn upload(
            &self,
            kind: &EntityKind,
            id: &str,
            document: UploadRequest,
            idempotency_key: &str,
        ) -> SyncResult<UploadedDocument> {
            let request = self
                .begin(RemoteCall::Upload {
                    kind: kind.to_string(),
                    id: id.to_string(),
                    filename: document.filename.clone(),
                    size: document.bytes.len(),
                })
                .await?;
            self.state().keys.push(idempotency_key.to_string());
            let n = self.uploads.fetch_add(1, Ordering::SeqCst) + 1;
            self.respond(
                request,
                UploadedDocument {
                    file_url: format!("https://files.test/{kind}/{id}/{n}/{}", document.filename),
                    extra: Fields::new(),
                },
            )
        }
    }
}
