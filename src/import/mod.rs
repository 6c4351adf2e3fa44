// # Import Pipeline
//
// Queue, scheduler, and worker pool. Items move through
// `queued -> hashing -> identifying -> resolving -> committing` and land in
// one of the terminal states; `failed -> queued` is the only backward edge
// and is taken solely by the retry scheduler.

pub mod events;
pub mod handle;
pub mod queue;
pub mod service;
pub mod types;

pub use events::StateEvents;
pub use handle::ImporterHandle;
pub use queue::ImportQueue;
pub use service::ImportService;
pub use types::{ImportError, ImportQueueItem, ItemState, StateEvent};
