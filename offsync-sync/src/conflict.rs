//! Conflict resolution between a queued update and the remote's current state.
//!
//! Given the local pre-edit copy, the remote's current copy, and the queued
//! changes, [`resolve`] produces the payload to send. The same inputs and
//! strategy always produce the same payload.

use offsync_types::Fields;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// How a queued update is reconciled with the remote's current copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictStrategy {
    /// Remote copy overlaid with every queued change.
    #[default]
    LastWriteWins,
    /// Field-wise: a change applies where the remote has not drifted from
    /// the local baseline.
    Merge,
    /// A caller-supplied resolver decides.
    Manual,
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConflictStrategy::LastWriteWins => "last-write-wins",
            ConflictStrategy::Merge => "merge",
            ConflictStrategy::Manual => "manual",
        })
    }
}

/// What a resolver sees.
#[derive(Debug, Clone, Copy)]
pub struct ConflictInput<'a> {
    /// Local copy before the edit, if one was known.
    pub local: Option<&'a Fields>,
    /// Remote's current copy.
    pub remote: &'a Fields,
    /// Under `Manual`, every queued change. Under `Merge`, only the
    /// conflicting ones.
    pub changes: &'a Fields,
}

/// Caller-supplied resolver. Must be pure.
pub type ManualResolver = Arc<dyn Fn(ConflictInput<'_>) -> Fields + Send + Sync>;

/// The active strategy plus an optional resolver.
#[derive(Clone, Default)]
pub struct ConflictResolution {
    pub strategy: ConflictStrategy,
    pub resolver: Option<ManualResolver>,
}

impl ConflictResolution {
    pub fn new(strategy: ConflictStrategy) -> Self {
        Self {
            strategy,
            resolver: None,
        }
    }

    #[must_use]
    pub fn with_resolver<F>(mut self, resolver: F) -> Self
    where
        F: Fn(ConflictInput<'_>) -> Fields + Send + Sync + 'static,
    {
        self.resolver = Some(Arc::new(resolver));
        self
    }
}

impl fmt::Debug for ConflictResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConflictResolution")
            .field("strategy", &self.strategy)
            .field("resolver", &self.resolver.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// Outcome of [`resolve`].
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    /// Body of the update request.
    pub payload: Fields,
    /// Fields both sides changed. Only computed under `Merge`.
    pub conflicts: Vec<String>,
}

/// Computes the payload for a queued update.
pub fn resolve(
    local: Option<&Fields>,
    remote: &Fields,
    changes: &Fields,
    resolution: &ConflictResolution,
) -> Resolved {
    match resolution.strategy {
        ConflictStrategy::LastWriteWins => {
            let mut payload = remote.clone();
            payload.extend(changes.iter().map(|(k, v)| (k.clone(), v.clone())));
            Resolved {
                payload,
                conflicts: Vec::new(),
            }
        }
        ConflictStrategy::Merge => merge(local, remote, changes, resolution.resolver.as_ref()),
        ConflictStrategy::Manual => match &resolution.resolver {
            Some(resolver) => Resolved {
                payload: resolver(ConflictInput {
                    local,
                    remote,
                    changes,
                }),
                conflicts: Vec::new(),
            },
            None => {
                warn!("Manual conflict strategy without a resolver, sending changes as-is");
                Resolved {
                    payload: changes.clone(),
                    conflicts: Vec::new(),
                }
            }
        },
    }
}

fn merge(
    local: Option<&Fields>,
    remote: &Fields,
    changes: &Fields,
    resolver: Option<&ManualResolver>,
) -> Resolved {
    let mut payload = remote.clone();
    let mut conflicting = Fields::new();

    for (field, value) in changes {
        let drifted = match remote.get(field) {
            None => false,
            Some(remote_value) if remote_value == value => false,
            Some(remote_value) => local.and_then(|l| l.get(field)) != Some(remote_value),
        };
        if drifted {
            conflicting.insert(field.clone(), value.clone());
        } else {
            payload.insert(field.clone(), value.clone());
        }
    }

    if conflicting.is_empty() {
        return Resolved {
            payload,
            conflicts: Vec::new(),
        };
    }

    let conflicts: Vec<String> = conflicting.keys().cloned().collect();
    match resolver {
        Some(resolver) => {
            let decided = resolver(ConflictInput {
                local,
                remote,
                changes: &conflicting,
            });
            for field in &conflicts {
                if let Some(value) = decided.get(field) {
                    payload.insert(field.clone(), value.clone());
                }
            }
        }
        None => {
            warn!(fields = ?conflicts, "Merge conflict, keeping local changes");
            payload.extend(conflicting);
        }
    }

    Resolved { payload, conflicts }
}
