// # Metadata Resolver
//
// Queries every configured backend for an exact digest match first, across
// all backends, before falling back to weaker signals: then the secondary
// header-skipping digest (still exact-match semantics), and only if no
// digest-based match exists at all, fuzzy filename matching scoped to one
// canonical system. Absence of metadata is not an error: zero candidates
// sends the item to needs_review, not failed.

use crate::hashing::DigestSet;
use crate::lookup::backend::{
    BackendRegistry, LookupError, MatchKind, MetadataBackend, MetadataCandidate,
};
use crate::lookup::normalize;
use crate::systems::{self, SystemId};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Outcome of resolution for one item.
#[derive(Debug, Clone)]
pub enum Resolution {
    /// The top candidate is unambiguous: strictly higher rank than the
    /// runner-up, or the only exact-digest match.
    AutoCommit {
        chosen: MetadataCandidate,
        candidates: Vec<MetadataCandidate>,
    },
    /// Tied top candidates; a human (or a future automated rule) picks.
    /// The resolver never auto-chooses among equally ranked candidates.
    NeedsReview { candidates: Vec<MetadataCandidate> },
    /// No backend knows this content.
    NoMatch,
}

pub struct MetadataResolver {
    registry: Arc<BackendRegistry>,
    backend_timeout: Duration,
}

impl MetadataResolver {
    pub fn new(registry: Arc<BackendRegistry>, backend_timeout: Duration) -> Self {
        MetadataResolver {
            registry,
            backend_timeout,
        }
    }

    /// Resolve candidates for one item's digests and filename.
    pub async fn resolve(
        &self,
        digests: &DigestSet,
        file_name: &str,
        system_hint: Option<SystemId>,
    ) -> Result<Resolution, LookupError> {
        // Phase 1: exact digest, all backends
        let mut candidates = self
            .query_all(|backend| {
                let digests = digests.clone();
                async move { backend.query_by_digest(&digests).await }
            })
            .await?;

        // Phase 2: secondary digest, still exact-match semantics
        if candidates.is_empty() && digests.crc32_headerless.is_some() {
            candidates = self
                .query_all(|backend| {
                    let digests = digests.clone();
                    async move { backend.query_by_partial_digest(&digests).await }
                })
                .await?;
        }

        // Phase 3: fuzzy filename, only inside an inferable system scope
        if candidates.is_empty() {
            if let Some(scope) = fuzzy_scope(file_name, system_hint) {
                let name = normalize::normalize_title(file_name);
                debug!("Fuzzy lookup for '{}' scoped to {:?}", name, scope);
                candidates = self
                    .query_all(|backend| {
                        let name = name.clone();
                        async move { backend.query_by_filename(&name, scope).await }
                    })
                    .await?;
                // The scope is authoritative; drop anything a backend
                // returned outside it.
                candidates.retain(|c| c.proposed_system == Some(scope));
            } else {
                debug!(
                    "No system scope inferable for '{}', skipping fuzzy lookup",
                    file_name
                );
            }
        }

        let ranked = dedupe_and_rank(candidates);
        Ok(decide(ranked))
    }

    /// Run one query against every registered backend concurrently, each
    /// under the per-backend timeout, collecting results in registry order.
    /// A timed-out or failed backend call fails the whole resolution; the
    /// scheduler retries the item.
    async fn query_all<F, Fut>(&self, make_query: F) -> Result<Vec<MetadataCandidate>, LookupError>
    where
        F: Fn(Arc<dyn MetadataBackend>) -> Fut,
        Fut: std::future::Future<Output = Result<Vec<MetadataCandidate>, LookupError>>,
    {
        let queries = self.registry.backends().iter().map(|backend| {
            let priority = backend.priority();
            let query = make_query(backend.clone());
            async move {
                let result = tokio::time::timeout(self.backend_timeout, query)
                    .await
                    .map_err(|_| LookupError::Timeout)??;
                Ok::<_, LookupError>((priority, result))
            }
        });

        let mut collected = Vec::new();
        for outcome in join_all(queries).await {
            let (priority, result) = outcome?;
            collected.extend(result.into_iter().map(|c| c.with_rank(priority)));
        }
        Ok(collected)
    }
}

/// The single canonical system fuzzy matching may search in, if any.
/// Explicit hints win; otherwise the extension must narrow to exactly one
/// system. Fuzzy matching is never used to also guess the system.
fn fuzzy_scope(file_name: &str, system_hint: Option<SystemId>) -> Option<SystemId> {
    if system_hint.is_some() {
        return system_hint;
    }
    let extension = file_name.rsplit_once('.')?.1.to_lowercase();
    match systems::systems_for_extension(&extension) {
        [single] => Some(*single),
        _ => None,
    }
}

/// Deduplicate by canonical catalog record and sort by
/// `(match_kind_rank, backend_priority)` ascending.
fn dedupe_and_rank(candidates: Vec<MetadataCandidate>) -> Vec<MetadataCandidate> {
    let mut best: HashMap<(String, String), MetadataCandidate> = HashMap::new();
    for candidate in candidates {
        let key = (
            candidate.backend_id.clone(),
            candidate.external_record_id.clone(),
        );
        match best.get(&key) {
            Some(existing) if existing.rank <= candidate.rank => {}
            _ => {
                best.insert(key, candidate);
            }
        }
    }

    let mut ranked: Vec<MetadataCandidate> = best.into_values().collect();
    ranked.sort_by(|a, b| {
        a.rank
            .cmp(&b.rank)
            .then_with(|| a.external_record_id.cmp(&b.external_record_id))
    });
    ranked
}

fn decide(candidates: Vec<MetadataCandidate>) -> Resolution {
    if candidates.is_empty() {
        return Resolution::NoMatch;
    }
    if candidates.len() == 1 {
        return Resolution::AutoCommit {
            chosen: candidates[0].clone(),
            candidates,
        };
    }

    let top = &candidates[0];
    let runner_up = &candidates[1];
    let sole_exact = top.match_kind == MatchKind::ExactDigest
        && candidates[1..]
            .iter()
            .all(|c| c.match_kind != MatchKind::ExactDigest);

    if top.rank < runner_up.rank || sole_exact {
        info!(
            "Auto-selecting '{}' from {} ({} candidate(s))",
            top.proposed_title,
            top.backend_id,
            candidates.len()
        );
        Resolution::AutoCommit {
            chosen: top.clone(),
            candidates,
        }
    } else {
        info!(
            "Ambiguous top candidates ('{}' vs '{}'), deferring to review",
            top.proposed_title, runner_up.proposed_title
        );
        Resolution::NeedsReview { candidates }
    }
}
