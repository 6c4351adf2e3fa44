use crate::import::types::StateEvent;
use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};
use tokio::sync::mpsc;
use tracing::debug;

type SubscriptionId = u64;

#[derive(Debug, Clone)]
enum SubscriptionFilter {
    All,
    Item { item_id: String },
}

impl SubscriptionFilter {
    fn matches(&self, event: &StateEvent) -> bool {
        match self {
            SubscriptionFilter::All => true,
            SubscriptionFilter::Item { item_id } => event.item_id == *item_id,
        }
    }
}

struct Subscription {
    filter: SubscriptionFilter,
    tx: mpsc::UnboundedSender<StateEvent>,
}

/// Broadcasts queue state transitions to subscribers. A subscription is
/// removed automatically once its receiver is dropped.
#[derive(Clone)]
pub struct StateEvents {
    subscriptions: Arc<Mutex<HashMap<SubscriptionId, Subscription>>>,
    next_id: Arc<AtomicU64>,
}

impl StateEvents {
    /// Spawn the dispatch task on the shared runtime and return the
    /// subscription surface.
    pub fn new(
        mut events_rx: mpsc::UnboundedReceiver<StateEvent>,
        runtime_handle: tokio::runtime::Handle,
    ) -> Self {
        let subscriptions: Arc<Mutex<HashMap<SubscriptionId, Subscription>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let subscriptions_clone = subscriptions.clone();

        runtime_handle.spawn(async move {
            while let Some(event) = events_rx.recv().await {
                let mut subs = subscriptions_clone.lock().unwrap();
                let mut dropped = Vec::new();

                for (id, subscription) in subs.iter() {
                    if subscription.filter.matches(&event)
                        && subscription.tx.send(event.clone()).is_err()
                    {
                        dropped.push(*id);
                    }
                }
                for id in dropped {
                    subs.remove(&id);
                }
            }
            debug!("Event channel closed, dispatch task exiting");
        });

        StateEvents {
            subscriptions,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Subscribe to every state transition.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<StateEvent> {
        self.add(SubscriptionFilter::All)
    }

    /// Subscribe to transitions of one item.
    pub fn subscribe_item(&self, item_id: String) -> mpsc::UnboundedReceiver<StateEvent> {
        self.add(SubscriptionFilter::Item { item_id })
    }

    fn add(&self, filter: SubscriptionFilter) -> mpsc::UnboundedReceiver<StateEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subscriptions
            .lock()
            .unwrap()
            .insert(id, Subscription { filter, tx });
        rx
    }
}
