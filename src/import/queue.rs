// # Import Queue
//
// FIFO intake with group pinning. Items sharing a group key leave the queue
// together as one batch so a multi-disc set is processed by exactly one
// worker. The queue owns the per-item cancellation flags and is the single
// writer of item state; every accepted transition is broadcast as an event.

use crate::grouping;
use crate::import::types::{transition_allowed, ImportQueueItem, ItemState, StateEvent};
use crate::systems::SystemId;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

pub struct ImportQueue {
    inner: Mutex<QueueInner>,
    events_tx: mpsc::UnboundedSender<StateEvent>,
}

struct QueueInner {
    fifo: VecDeque<String>,
    items: HashMap<String, ImportQueueItem>,
    cancel_flags: HashMap<String, Arc<AtomicBool>>,
}

impl ImportQueue {
    pub fn new(events_tx: mpsc::UnboundedSender<StateEvent>) -> Self {
        ImportQueue {
            inner: Mutex::new(QueueInner {
                fifo: VecDeque::new(),
                items: HashMap::new(),
                cancel_flags: HashMap::new(),
            }),
            events_tx,
        }
    }

    /// Add a source file to the queue. Returns the new item's id.
    pub fn enqueue(&self, source_path: PathBuf, system_hint: Option<SystemId>) -> String {
        let now = Utc::now();
        let item = ImportQueueItem {
            id: Uuid::new_v4().to_string(),
            group_key: grouping::group_key_for(&source_path),
            source_path,
            state: ItemState::Queued,
            system_hint,
            digests: None,
            candidates: Vec::new(),
            entry_id: None,
            retry_count: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        let id = item.id.clone();

        let mut inner = self.inner.lock().unwrap();
        inner
            .cancel_flags
            .insert(id.clone(), Arc::new(AtomicBool::new(false)));
        inner.items.insert(id.clone(), item);
        inner.fifo.push_back(id.clone());
        drop(inner);

        self.emit(&id, ItemState::Queued);
        id
    }

    /// Take the next batch: the head of the queue plus every other queued
    /// item sharing its group key, in queue order.
    pub fn pop_batch(&self) -> Option<Vec<String>> {
        let mut inner = self.inner.lock().unwrap();
        let head = inner.fifo.pop_front()?;
        let group_key = inner.items.get(&head).and_then(|i| i.group_key.clone());

        let mut batch = vec![head];
        if let Some(key) = group_key {
            let mut remaining = VecDeque::new();
            while let Some(id) = inner.fifo.pop_front() {
                let same_group = inner
                    .items
                    .get(&id)
                    .is_some_and(|i| i.group_key.as_deref() == Some(key.as_str()));
                if same_group {
                    batch.push(id);
                } else {
                    remaining.push_back(id);
                }
            }
            inner.fifo = remaining;
            debug!("Dispatching group '{}' as a batch of {}", key, batch.len());
        }
        Some(batch)
    }

    /// Apply a state transition. Illegal transitions are rejected, which is
    /// how workers discover an item was cancelled out from under them.
    pub fn set_state(&self, id: &str, to: ItemState) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(item) = inner.items.get_mut(id) else {
            return false;
        };
        if !transition_allowed(item.state, to) {
            debug!(
                "Rejected transition {} -> {} for item {}",
                item.state.as_str(),
                to.as_str(),
                id
            );
            return false;
        }
        item.state = to;
        item.updated_at = Utc::now();
        drop(inner);

        self.emit(id, to);
        true
    }

    /// Request cancellation. Queued items are cancelled immediately and
    /// removed from the dispatch order; in-flight items observe the flag at
    /// the next stage boundary.
    pub fn cancel(&self, id: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(flag) = inner.cancel_flags.get(id) else {
            return false;
        };
        flag.store(true, Ordering::Relaxed);

        let was_queued = inner
            .items
            .get(id)
            .is_some_and(|i| i.state == ItemState::Queued);
        if was_queued {
            inner.fifo.retain(|queued| queued != id);
            if let Some(item) = inner.items.get_mut(id) {
                item.state = ItemState::Cancelled;
                item.updated_at = Utc::now();
            }
            drop(inner);
            self.emit(id, ItemState::Cancelled);
        }
        true
    }

    pub fn cancel_flag(&self, id: &str) -> Option<Arc<AtomicBool>> {
        self.inner.lock().unwrap().cancel_flags.get(id).cloned()
    }

    /// Put a failed item back at the tail of the queue (the retry edge).
    pub fn requeue(&self, id: &str) -> bool {
        if !self.set_state(id, ItemState::Queued) {
            return false;
        }
        self.inner.lock().unwrap().fifo.push_back(id.to_string());
        true
    }

    /// Record a failure. Returns the attempt count consumed so far.
    pub fn record_failure(&self, id: &str, error: &str) -> u32 {
        let mut inner = self.inner.lock().unwrap();
        let Some(item) = inner.items.get_mut(id) else {
            return 0;
        };
        item.last_error = Some(error.to_string());
        item.retry_count += 1;
        item.retry_count
    }

    pub fn record_digests(&self, id: &str, digests: crate::hashing::DigestSet) {
        self.update(id, |item| item.digests = Some(digests));
    }

    pub fn record_candidates(&self, id: &str, candidates: Vec<crate::lookup::MetadataCandidate>) {
        self.update(id, |item| item.candidates = candidates);
    }

    pub fn record_entry(&self, id: &str, entry_id: String) {
        self.update(id, |item| item.entry_id = Some(entry_id));
    }

    pub fn get(&self, id: &str) -> Option<ImportQueueItem> {
        self.inner.lock().unwrap().items.get(id).cloned()
    }

    /// Owned snapshot of every tracked item, oldest first.
    pub fn snapshot(&self) -> Vec<ImportQueueItem> {
        let inner = self.inner.lock().unwrap();
        let mut items: Vec<ImportQueueItem> = inner.items.values().cloned().collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        items
    }

    /// Drop a terminal item from tracking (review resolution, cleanup).
    pub fn acknowledge(&self, id: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let terminal = inner
            .items
            .get(id)
            .is_some_and(|item| item.state.is_terminal());
        if !terminal {
            warn!("Refusing to acknowledge non-terminal item {}", id);
            return false;
        }
        inner.items.remove(id);
        inner.cancel_flags.remove(id);
        true
    }

    fn update(&self, id: &str, apply: impl FnOnce(&mut ImportQueueItem)) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(item) = inner.items.get_mut(id) {
            apply(item);
            item.updated_at = Utc::now();
        }
    }

    fn emit(&self, id: &str, state: ItemState) {
        // Nobody listening is fine
        let _ = self.events_tx.send(StateEvent {
            item_id: id.to_string(),
            state,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> (ImportQueue, mpsc::UnboundedReceiver<StateEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ImportQueue::new(tx), rx)
    }

    #[test]
    fn fifo_order_is_preserved() {
        let (queue, _rx) = queue();
        let a = queue.enqueue(PathBuf::from("a.sfc"), None);
        let b = queue.enqueue(PathBuf::from("b.sfc"), None);

        assert_eq!(queue.pop_batch(), Some(vec![a]));
        assert_eq!(queue.pop_batch(), Some(vec![b]));
        assert_eq!(queue.pop_batch(), None);
    }

    #[test]
    fn group_members_leave_as_one_batch() {
        let (queue, _rx) = queue();
        let disc1 = queue.enqueue(PathBuf::from("Game (Disc 1).bin"), None);
        let other = queue.enqueue(PathBuf::from("Other.sfc"), None);
        let disc2 = queue.enqueue(PathBuf::from("Game (Disc 2).bin"), None);

        assert_eq!(queue.pop_batch(), Some(vec![disc1, disc2]));
        // The interleaved singleton kept its place
        assert_eq!(queue.pop_batch(), Some(vec![other]));
    }

    #[test]
    fn cancel_of_queued_item_is_immediate() {
        let (queue, _rx) = queue();
        let id = queue.enqueue(PathBuf::from("a.sfc"), None);
        assert!(queue.cancel(&id));

        assert_eq!(queue.get(&id).unwrap().state, ItemState::Cancelled);
        assert_eq!(queue.pop_batch(), None);
    }

    #[test]
    fn cancel_of_running_item_only_sets_the_flag() {
        let (queue, _rx) = queue();
        let id = queue.enqueue(PathBuf::from("a.sfc"), None);
        let batch = queue.pop_batch().unwrap();
        assert!(queue.set_state(&batch[0], ItemState::Hashing));

        assert!(queue.cancel(&id));
        assert_eq!(queue.get(&id).unwrap().state, ItemState::Hashing);
        assert!(queue.cancel_flag(&id).unwrap().load(Ordering::Relaxed));
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        let (queue, _rx) = queue();
        let id = queue.enqueue(PathBuf::from("a.sfc"), None);
        assert!(!queue.set_state(&id, ItemState::Committing));
        assert!(queue.set_state(&id, ItemState::Hashing));
        assert!(!queue.set_state(&id, ItemState::Queued));
    }

    #[test]
    fn every_transition_is_broadcast() {
        let (queue, mut rx) = queue();
        let id = queue.enqueue(PathBuf::from("a.sfc"), None);
        queue.set_state(&id, ItemState::Hashing);

        let first = rx.try_recv().unwrap();
        assert_eq!(first.state, ItemState::Queued);
        let second = rx.try_recv().unwrap();
        assert_eq!(second.state, ItemState::Hashing);
        assert_eq!(second.item_id, id);
    }

    #[test]
    fn record_failure_after_acknowledge_reports_zero_attempts() {
        let (queue, _rx) = queue();
        let id = queue.enqueue(PathBuf::from("a.sfc"), None);
        queue.cancel(&id);
        queue.acknowledge(&id);

        // The retry scheduler must treat zero as "gone", not as attempt -1
        assert_eq!(queue.record_failure(&id, "late failure"), 0);
    }

    #[test]
    fn acknowledge_requires_terminal_state() {
        let (queue, _rx) = queue();
        let id = queue.enqueue(PathBuf::from("a.sfc"), None);
        assert!(!queue.acknowledge(&id));

        queue.cancel(&id);
        assert!(queue.acknowledge(&id));
        assert!(queue.get(&id).is_none());
    }
}
