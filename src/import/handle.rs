// # Importer Handle
//
// Cloneable public surface of the import service: enqueue sources, cancel
// and acknowledge items, inspect the queue, subscribe to state events, and
// store auxiliary packages.

use crate::commit::{CommitError, Committer};
use crate::import::events::StateEvents;
use crate::import::queue::ImportQueue;
use crate::import::types::{ImportQueueItem, StateEvent};
use crate::package::PackageEnvelope;
use crate::systems::SystemId;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tracing::info;

#[derive(Clone)]
pub struct ImporterHandle {
    queue: Arc<ImportQueue>,
    notify: Arc<Notify>,
    events: StateEvents,
    committer: Arc<Committer>,
}

impl ImporterHandle {
    pub(crate) fn new(
        queue: Arc<ImportQueue>,
        notify: Arc<Notify>,
        events: StateEvents,
        committer: Arc<Committer>,
    ) -> Self {
        ImporterHandle {
            queue,
            notify,
            events,
            committer,
        }
    }

    /// Enqueue a source file for import. Returns the item id used by every
    /// other operation on this handle.
    pub fn enqueue(&self, source_path: PathBuf, system_hint: Option<SystemId>) -> String {
        info!("Enqueuing {}", source_path.display());
        let id = self.queue.enqueue(source_path, system_hint);
        self.notify.notify_one();
        id
    }

    /// Enqueue several sources at once, before any worker is woken. Parts
    /// of a multi-disc set enqueued together are guaranteed to be batched
    /// together.
    pub fn enqueue_all(
        &self,
        sources: impl IntoIterator<Item = (PathBuf, Option<SystemId>)>,
    ) -> Vec<String> {
        let ids: Vec<String> = sources
            .into_iter()
            .map(|(path, hint)| {
                info!("Enqueuing {}", path.display());
                self.queue.enqueue(path, hint)
            })
            .collect();
        self.notify.notify_one();
        ids
    }

    /// Request cancellation. Queued items cancel immediately; running items
    /// stop at the next stage boundary. Already-terminal items are
    /// unaffected.
    pub fn cancel(&self, item_id: &str) -> bool {
        self.queue.cancel(item_id)
    }

    /// Resolve a terminal item (including `needs_review`) and drop it from
    /// the queue's tracking.
    pub fn acknowledge(&self, item_id: &str) -> bool {
        self.queue.acknowledge(item_id)
    }

    pub fn item(&self, item_id: &str) -> Option<ImportQueueItem> {
        self.queue.get(item_id)
    }

    /// Snapshot of every tracked item, oldest first.
    pub fn snapshot(&self) -> Vec<ImportQueueItem> {
        self.queue.snapshot()
    }

    /// Subscribe to every state transition.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<StateEvent> {
        self.events.subscribe()
    }

    /// Subscribe to one item's transitions.
    pub fn subscribe_item(&self, item_id: &str) -> mpsc::UnboundedReceiver<StateEvent> {
        self.events.subscribe_item(item_id.to_string())
    }

    /// Persist an auxiliary package (save state, config) through the same
    /// transactional committer the pipeline uses.
    pub async fn store_package(&self, envelope: PackageEnvelope) -> Result<String, CommitError> {
        self.committer.commit_package(envelope).await
    }
}
