use crate::commit::CommitError;
use crate::hashing::{DigestSet, HashError};
use crate::lookup::{LookupError, MetadataCandidate};
use crate::storage::StorageError;
use crate::systems::SystemId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Lifecycle state of a queue item.
///
/// Forward edges only, except the single retry edge `failed -> queued`.
/// `needs_review`, `succeeded`, `duplicate`, and `cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    Queued,
    Hashing,
    Identifying,
    Resolving,
    Committing,
    Succeeded,
    Duplicate,
    NeedsReview,
    Failed,
    Cancelled,
}

impl ItemState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemState::Queued => "queued",
            ItemState::Hashing => "hashing",
            ItemState::Identifying => "identifying",
            ItemState::Resolving => "resolving",
            ItemState::Committing => "committing",
            ItemState::Succeeded => "succeeded",
            ItemState::Duplicate => "duplicate",
            ItemState::NeedsReview => "needs_review",
            ItemState::Failed => "failed",
            ItemState::Cancelled => "cancelled",
        }
    }

    /// No further automatic transitions happen out of these states.
    /// `failed` still accepts the scheduled retry edge back to `queued`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ItemState::Succeeded
                | ItemState::Duplicate
                | ItemState::NeedsReview
                | ItemState::Failed
                | ItemState::Cancelled
        )
    }
}

/// Legal state machine edges.
pub fn transition_allowed(from: ItemState, to: ItemState) -> bool {
    use ItemState::*;
    match (from, to) {
        (Queued, Hashing) => true,
        (Hashing, Identifying) => true,
        (Identifying, Resolving) => true,
        (Resolving, Committing) | (Resolving, NeedsReview) => true,
        (Committing, Succeeded) | (Committing, Duplicate) => true,
        // The one backward edge: a scheduled retry
        (Failed, Queued) => true,
        (from, Failed) if !from.is_terminal() => true,
        (from, Cancelled) if !from.is_terminal() => true,
        _ => false,
    }
}

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("hashing failed: {0}")]
    Hash(#[from] HashError),
    #[error("metadata lookup failed: {0}")]
    Lookup(#[from] LookupError),
    #[error("commit failed: {0}")]
    Commit(#[from] CommitError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("cancelled")]
    Cancelled,
}

impl ImportError {
    /// Transient errors are retried with backoff until the attempt bound;
    /// everything else fails the item permanently.
    pub fn is_transient(&self) -> bool {
        match self {
            ImportError::Lookup(LookupError::Timeout)
            | ImportError::Lookup(LookupError::Unavailable(_))
            | ImportError::Lookup(LookupError::Database(_)) => true,
            ImportError::Commit(CommitError::Timeout)
            | ImportError::Commit(CommitError::Database(_)) => true,
            ImportError::Commit(CommitError::Storage(err)) => matches!(
                err,
                StorageError::Io(_) | StorageError::FreeSpaceUnknown(_)
            ),
            ImportError::Database(_) => true,
            ImportError::Hash(_) | ImportError::Lookup(_) | ImportError::Cancelled => false,
        }
    }
}

/// Snapshot of one queue item. Owned copies are handed out; the live record
/// stays inside the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportQueueItem {
    pub id: String,
    pub source_path: PathBuf,
    pub state: ItemState,
    /// Pinning key for multi-part sets; members sharing a key are
    /// dispatched to one worker as a single batch.
    pub group_key: Option<String>,
    pub system_hint: Option<SystemId>,
    pub digests: Option<DigestSet>,
    pub candidates: Vec<MetadataCandidate>,
    /// Catalog entry this item produced (or duplicated).
    pub entry_id: Option<String>,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Broadcast on every state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateEvent {
    pub item_id: String,
    pub state: ItemState,
}
