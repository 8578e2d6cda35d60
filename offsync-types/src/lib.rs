//! Core type definitions for offsync.
//!
//! This crate defines the small, storage-agnostic types shared by every
//! other crate in the workspace:
//! - Operation identifiers (UUID v7, so they sort by creation time)
//! - Millisecond wall-clock timestamps
//! - The generic [`Entity`] record exchanged with the remote authority
//!
//! Domain fields (whatever a particular entity kind carries) are kept as
//! opaque JSON; nothing here knows about them.

mod entity;
mod ids;
mod timestamp;

pub use entity::{Entity, EntityKind, Fields, checksum};
pub use ids::OperationId;
pub use timestamp::{Millis, now_millis};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("invalid entity: {0}")]
    InvalidEntity(String),
}
