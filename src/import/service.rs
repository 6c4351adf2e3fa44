// # Import Service - Scheduler
//
// Owns the worker pool. Workers pull batches off the queue (a singleton, or
// a whole pinned group), run each member through the pipeline stages, and
// hand the surviving members to the committer as one plan. A failed member
// aborts its whole batch so a group never commits partially.
//
// Retry policy: transient failures are requeued with exponential backoff
// until the attempt bound; everything else fails the item permanently.

use crate::commit::Committer;
use crate::context::ImporterContext;
use crate::grouping::{self, ResolvedItem};
use crate::hashing::{self, HashError};
use crate::import::events::StateEvents;
use crate::import::handle::ImporterHandle;
use crate::import::queue::ImportQueue;
use crate::import::types::{ImportError, ImportQueueItem, ItemState};
use crate::lookup::{MetadataCandidate, MetadataResolver, Resolution};
use crate::systems::{self, SystemId};
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Notify};
use tracing::{info, warn};

pub struct ImportService {
    context: ImporterContext,
    queue: Arc<ImportQueue>,
    resolver: Arc<MetadataResolver>,
    committer: Arc<Committer>,
    notify: Arc<Notify>,
    in_flight: InFlightIdentities,
}

impl ImportService {
    /// Start the worker pool on the shared runtime, returning the handle
    /// used to enqueue items and observe them.
    pub fn start(runtime_handle: tokio::runtime::Handle, context: ImporterContext) -> ImporterHandle {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let queue = Arc::new(ImportQueue::new(events_tx));
        let notify = Arc::new(Notify::new());
        let resolver = Arc::new(MetadataResolver::new(
            context.registry.clone(),
            context.config.backend_timeout,
        ));
        let committer = Arc::new(Committer::new(
            context.db.clone(),
            context.storage.clone(),
            context.config.commit_timeout,
        ));

        let service = Arc::new(ImportService {
            queue: queue.clone(),
            resolver,
            committer: committer.clone(),
            notify: notify.clone(),
            in_flight: InFlightIdentities::new(),
            context,
        });

        let worker_count = service.context.config.worker_count;
        info!("Starting {} import worker(s)", worker_count);
        for worker_id in 0..worker_count {
            let service = service.clone();
            runtime_handle.spawn(service.worker_loop(worker_id));
        }

        let events = StateEvents::new(events_rx, runtime_handle);
        ImporterHandle::new(queue, notify, events, committer)
    }

    async fn worker_loop(self: Arc<Self>, worker_id: usize) {
        loop {
            let wakeup = self.notify.notified();
            match self.queue.pop_batch() {
                Some(batch) => {
                    // More work may remain behind this batch; keep a
                    // sibling worker awake
                    self.notify.notify_one();
                    self.process_batch(worker_id, batch).await;
                }
                None => wakeup.await,
            }
        }
    }

    async fn process_batch(&self, worker_id: usize, batch: Vec<String>) {
        let multi_member = batch.len() > 1;
        let mut resolved: Vec<ResolvedItem> = Vec::new();
        let mut parked = false;
        let mut pending = batch.into_iter();

        while let Some(id) = pending.next() {
            match self.process_member(&id).await {
                Ok(MemberOutcome::Resolved(item)) => resolved.push(item),
                Ok(MemberOutcome::Left) => {}
                Ok(MemberOutcome::Parked) => parked = true,
                Err(err) => {
                    // A group commits whole or not at all, so one member's
                    // failure pulls its siblings back with it
                    let mut affected = vec![id];
                    if multi_member {
                        affected.extend(resolved.drain(..).map(|r| r.item_id));
                        affected.extend(pending.by_ref());
                    }
                    self.handle_failure(affected, err);
                    resolved.clear();
                    break;
                }
            }
        }

        // A group commits whole or not at all: one member parked for
        // review parks its resolved siblings with it
        if parked && multi_member && !resolved.is_empty() {
            info!(
                "Group member parked for review, parking {} resolved sibling(s)",
                resolved.len()
            );
            for item in resolved {
                if self.is_cancelled(&item.item_id) {
                    self.queue.set_state(&item.item_id, ItemState::Cancelled);
                } else {
                    self.queue.set_state(&item.item_id, ItemState::NeedsReview);
                }
            }
            return;
        }

        // Commit boundary: last cancellation check before work becomes
        // durable
        let mut committable = Vec::new();
        for item in resolved {
            if self.is_cancelled(&item.item_id) {
                self.queue.set_state(&item.item_id, ItemState::Cancelled);
            } else {
                committable.push(item);
            }
        }
        if committable.is_empty() {
            return;
        }

        let identities: Vec<(SystemId, String)> = committable
            .iter()
            .map(|item| (item.system, item.digests.md5.clone()))
            .collect();
        let member_ids: Vec<String> = committable.iter().map(|i| i.item_id.clone()).collect();

        // Serialize on content identity so two workers holding identical
        // bytes cannot both commit; the loser re-checks the catalog and
        // lands as a duplicate
        self.in_flight.acquire(&identities).await;
        let result = self.commit_batch(worker_id, committable).await;
        self.in_flight.release(&identities);

        if let Err(err) = result {
            self.handle_failure(member_ids, err);
        }
    }

    /// Run one member through hashing and resolution.
    async fn process_member(&self, id: &str) -> Result<MemberOutcome, ImportError> {
        let Some(item) = self.queue.get(id) else {
            return Ok(MemberOutcome::Left);
        };
        let Some(cancel) = self.queue.cancel_flag(id) else {
            return Ok(MemberOutcome::Left);
        };
        if !self.queue.set_state(id, ItemState::Hashing) {
            return Ok(MemberOutcome::Left);
        }

        let extension = item
            .source_path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase());
        let header_skip = extension
            .as_deref()
            .and_then(systems::header_skip_for_extension);

        let digests = match hashing::compute_digests(
            &item.source_path,
            self.context.config.hash_chunk_size,
            header_skip,
            &cancel,
            None,
        )
        .await
        {
            Ok(digests) => digests,
            Err(HashError::Cancelled) => {
                self.queue.set_state(id, ItemState::Cancelled);
                return Ok(MemberOutcome::Left);
            }
            Err(err) => return Err(err.into()),
        };
        self.queue.record_digests(id, digests.clone());

        if cancel.load(Ordering::Relaxed) {
            self.queue.set_state(id, ItemState::Cancelled);
            return Ok(MemberOutcome::Left);
        }
        if !self.queue.set_state(id, ItemState::Identifying) {
            return Ok(MemberOutcome::Left);
        }

        let file_name = item
            .source_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let resolution = self
            .resolver
            .resolve(&digests, &file_name, item.system_hint)
            .await?;

        if cancel.load(Ordering::Relaxed) {
            self.queue.set_state(id, ItemState::Cancelled);
            return Ok(MemberOutcome::Left);
        }
        if !self.queue.set_state(id, ItemState::Resolving) {
            return Ok(MemberOutcome::Left);
        }

        match resolution {
            Resolution::AutoCommit { chosen, candidates } => {
                self.queue.record_candidates(id, candidates);
                match classify_system(&item, &chosen) {
                    Some(system) => Ok(MemberOutcome::Resolved(ResolvedItem {
                        item_id: item.id,
                        source_path: item.source_path,
                        system,
                        title: chosen.proposed_title,
                        region: chosen.region,
                        digests,
                    })),
                    None => {
                        // A match without a classifiable system is not
                        // committable
                        warn!("No canonical system for {}, parking for review", file_name);
                        self.queue.set_state(id, ItemState::NeedsReview);
                        Ok(MemberOutcome::Parked)
                    }
                }
            }
            Resolution::NeedsReview { candidates } => {
                info!(
                    "{} has {} ambiguous candidate(s), parking for review",
                    file_name,
                    candidates.len()
                );
                self.queue.record_candidates(id, candidates);
                self.queue.set_state(id, ItemState::NeedsReview);
                Ok(MemberOutcome::Parked)
            }
            Resolution::NoMatch => {
                info!("No backend knows {}, parking for review", file_name);
                self.queue.set_state(id, ItemState::NeedsReview);
                Ok(MemberOutcome::Parked)
            }
        }
    }

    async fn commit_batch(
        &self,
        worker_id: usize,
        members: Vec<ResolvedItem>,
    ) -> Result<(), ImportError> {
        for member in &members {
            self.queue.set_state(&member.item_id, ItemState::Committing);
        }

        let outcome = grouping::build_commit_plan(&self.context.db, members).await?;

        for (item_id, entry_id) in &outcome.duplicates {
            self.queue.record_entry(item_id, entry_id.clone());
            self.queue.set_state(item_id, ItemState::Duplicate);
            if let Err(err) = self.committer.record_duplicate(item_id, entry_id).await {
                warn!("Could not record duplicate audit row: {}", err);
            }
        }

        if let Some(plan) = outcome.plan {
            let receipt = self.committer.commit(&plan).await?;
            info!(
                "Worker {} committed {} item(s)",
                worker_id,
                receipt.entries.len()
            );
            for (item_id, entry_id) in receipt.entries {
                self.queue.record_entry(&item_id, entry_id);
                self.queue.set_state(&item_id, ItemState::Succeeded);
            }
        }

        Ok(())
    }

    fn handle_failure(&self, ids: Vec<String>, err: ImportError) {
        let transient = err.is_transient();
        let message = err.to_string();

        let mut retry_ids = Vec::new();
        let mut delay = std::time::Duration::ZERO;

        for id in ids {
            // Members that already reached a terminal state keep it
            if !self.queue.set_state(&id, ItemState::Failed) {
                continue;
            }
            let attempts = self.queue.record_failure(&id, &message);
            if attempts == 0 {
                // Acknowledged out from under us between the state change
                // and the failure record
                continue;
            }

            if transient && attempts < self.context.config.max_attempts {
                let backoff = self.context.config.retry_base_delay * 2u32.pow(attempts - 1);
                warn!(
                    "Item {} failed (attempt {}): {}; retrying in {:?}",
                    id, attempts, message, backoff
                );
                delay = delay.max(backoff);
                retry_ids.push(id);
            } else {
                warn!(
                    "Item {} failed permanently after {} attempt(s): {}",
                    id, attempts, message
                );
            }
        }

        // One timer for the whole batch: group members must reenter the
        // queue together or a partial group could commit on retry
        if !retry_ids.is_empty() {
            let queue = self.queue.clone();
            let notify = self.notify.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                for id in retry_ids {
                    queue.requeue(&id);
                }
                notify.notify_one();
            });
        }
    }

    fn is_cancelled(&self, id: &str) -> bool {
        self.queue
            .cancel_flag(id)
            .map(|flag| flag.load(Ordering::Relaxed))
            .unwrap_or(true)
    }
}

/// How one member left the pipeline stages.
enum MemberOutcome {
    /// Ready to be planned and committed.
    Resolved(ResolvedItem),
    /// Cancelled or gone; siblings are unaffected.
    Left,
    /// Parked for review; a multi-member batch parks with it.
    Parked,
}

/// Canonical system for a committable item: the candidate's proposal wins,
/// then the caller's hint, then an unambiguous extension mapping.
fn classify_system(item: &ImportQueueItem, chosen: &MetadataCandidate) -> Option<SystemId> {
    chosen
        .proposed_system
        .or(item.system_hint)
        .or_else(|| {
            let extension = item.source_path.extension()?.to_str()?.to_lowercase();
            match systems::systems_for_extension(&extension) {
                [single] => Some(*single),
                _ => None,
            }
        })
}

/// Content identities currently inside a commit. Workers holding the same
/// `(system, digest)` pair wait here instead of racing the unique index.
struct InFlightIdentities {
    held: Mutex<HashSet<(SystemId, String)>>,
    released: Notify,
}

impl InFlightIdentities {
    fn new() -> Self {
        InFlightIdentities {
            held: Mutex::new(HashSet::new()),
            released: Notify::new(),
        }
    }

    /// Block until every key is free, then take them all at once. Taking
    /// the whole set atomically avoids lock-order deadlocks between
    /// batches.
    async fn acquire(&self, keys: &[(SystemId, String)]) {
        loop {
            let wakeup = self.released.notified();
            {
                let mut held = self.held.lock().unwrap();
                if keys.iter().all(|key| !held.contains(key)) {
                    for key in keys {
                        held.insert(key.clone());
                    }
                    return;
                }
            }
            wakeup.await;
        }
    }

    fn release(&self, keys: &[(SystemId, String)]) {
        let mut held = self.held.lock().unwrap();
        for key in keys {
            held.remove(key);
        }
        drop(held);
        self.released.notify_waiters();
    }
}
