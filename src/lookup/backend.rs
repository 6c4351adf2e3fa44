use crate::hashing::DigestSet;
use crate::systems::SystemId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LookupError {
    #[error("backend timed out")]
    Timeout,
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("malformed backend response: {0}")]
    Malformed(String),
}

/// How a candidate was matched, strongest first. An exact digest always
/// outranks fuzzy filename matching regardless of which backend produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    ExactDigest,
    PartialDigest,
    FuzzyFilename,
}

impl MatchKind {
    pub fn rank(&self) -> u32 {
        match self {
            MatchKind::ExactDigest => 0,
            MatchKind::PartialDigest => 1,
            MatchKind::FuzzyFilename => 2,
        }
    }
}

/// An unconfirmed match proposed by a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataCandidate {
    pub backend_id: String,
    pub match_kind: MatchKind,
    pub external_record_id: String,
    pub proposed_title: String,
    /// `None` when the backend's system id is not in our mapping tables;
    /// the classifier rejects rather than guesses.
    pub proposed_system: Option<SystemId>,
    pub region: Option<String>,
    /// Derived ordering key: `(match_kind_rank, backend_priority)` flattened.
    /// Lower is better.
    pub rank: u32,
}

impl MetadataCandidate {
    pub fn with_rank(mut self, backend_priority: u32) -> Self {
        self.rank = self.match_kind.rank() * 1000 + backend_priority;
        self
    }
}

/// A read-only external metadata catalog.
///
/// Backends are swappable and may be backed by different storage engines
/// (local sqlite, remote HTTP API). All queries are read-only.
#[async_trait::async_trait]
pub trait MetadataBackend: Send + Sync {
    /// Stable registry key for this backend.
    fn id(&self) -> &str;

    /// Tie-break priority among candidates of the same match kind.
    /// Lower wins.
    fn priority(&self) -> u32;

    /// Exact content-digest lookup.
    async fn query_by_digest(
        &self,
        digests: &DigestSet,
    ) -> Result<Vec<MetadataCandidate>, LookupError>;

    /// Exact lookup on the secondary (header-skipping) digest. Backends
    /// without headerless records return nothing.
    async fn query_by_partial_digest(
        &self,
        _digests: &DigestSet,
    ) -> Result<Vec<MetadataCandidate>, LookupError> {
        Ok(Vec::new())
    }

    /// Fuzzy filename lookup, scoped to one canonical system. The system
    /// scope is mandatory here: fuzzy matching is never used to also guess
    /// the system.
    async fn query_by_filename(
        &self,
        normalized_name: &str,
        system: SystemId,
    ) -> Result<Vec<MetadataCandidate>, LookupError>;
}

/// Explicit backend registry, populated once at startup and queried by key
/// thereafter. Registration order doubles as query order.
#[derive(Default)]
pub struct BackendRegistry {
    ordered: Vec<Arc<dyn MetadataBackend>>,
    by_key: HashMap<String, Arc<dyn MetadataBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, backend: Arc<dyn MetadataBackend>) {
        self.by_key
            .insert(backend.id().to_string(), backend.clone());
        self.ordered.push(backend);
    }

    pub fn backends(&self) -> &[Arc<dyn MetadataBackend>] {
        &self.ordered
    }

    pub fn get(&self, key: &str) -> Option<&Arc<dyn MetadataBackend>> {
        self.by_key.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys: Vec<&str> = self.ordered.iter().map(|b| b.id()).collect();
        f.debug_struct("BackendRegistry")
            .field("backends", &keys)
            .finish()
    }
}
