//! The generic entity record.
//!
//! The remote authority owns entities; the local store keeps a cache of them
//! that may be stale or carry unsynced edits. Only `id`, `version` and
//! `updatedAt` are interpreted by the engine, everything else rides along in
//! [`Entity::fields`].

use crate::Error;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

/// A flat JSON object of entity fields.
pub type Fields = serde_json::Map<String, Value>;

/// Name of an entity collection (`equipment`, `documents`, ...).
///
/// Used both as a local table key and as a URL path segment, so it must be
/// non-empty and must not contain `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityKind(String);

impl EntityKind {
    /// Validates and wraps a kind name.
    pub fn new(name: impl Into<String>) -> crate::Result<Self> {
        let name = name.into();
        if name.is_empty() || name.contains('/') || name.trim() != name {
            return Err(Error::InvalidEntity(format!("invalid entity kind: {name:?}")));
        }
        Ok(Self(name))
    }

    /// Returns the kind name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for EntityKind {
    type Error = Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::new(value)
    }
}

impl From<EntityKind> for String {
    fn from(kind: EntityKind) -> Self {
        kind.0
    }
}

impl AsRef<str> for EntityKind {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A generic domain record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    #[serde(default)]
    pub version: u64,
    #[serde(rename = "updatedAt", default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub fields: Fields,
}

impl Entity {
    /// Creates an entity with no domain fields.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: 0,
            updated_at: None,
            fields: Fields::new(),
        }
    }

    /// Builder-style field setter.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Returns a domain field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Returns a domain field as a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// Overwrites fields with every key present in `changes`.
    ///
    /// `id` is never changed this way; `version` and `updatedAt` are taken if
    /// present and well-formed.
    pub fn apply(&mut self, changes: &Fields) {
        for (key, value) in changes {
            match key.as_str() {
                "id" => {}
                "version" => {
                    if let Some(v) = value.as_u64() {
                        self.version = v;
                    }
                }
                "updatedAt" => {
                    if let Ok(ts) = serde_json::from_value(value.clone()) {
                        self.updated_at = Some(ts);
                    }
                }
                _ => {
                    self.fields.insert(key.clone(), value.clone());
                }
            }
        }
    }

    /// Returns the full JSON object, engine fields included.
    pub fn to_fields(&self) -> Fields {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            // Entity always serializes to an object.
            _ => Fields::new(),
        }
    }

    /// Parses an entity from a JSON object; `id` is required.
    pub fn from_fields(fields: Fields) -> crate::Result<Self> {
        Self::from_value(Value::Object(fields))
    }

    /// Parses an entity from an arbitrary JSON value.
    pub fn from_value(value: Value) -> crate::Result<Self> {
        match value.get("id") {
            Some(Value::String(id)) if !id.is_empty() => {}
            _ => return Err(Error::InvalidEntity("missing string `id`".to_string())),
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Returns the entity as a JSON value.
    pub fn to_value(&self) -> Value {
        Value::Object(self.to_fields())
    }

    /// SHA-256 of the entity's canonical JSON.
    pub fn checksum(&self) -> String {
        checksum(&self.to_value())
    }
}

/// SHA-256 (hex) of a JSON value serialized with sorted object keys.
pub fn checksum(value: &Value) -> String {
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    hex::encode(Sha256::digest(&bytes))
}
