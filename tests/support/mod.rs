// Shared harness for integration tests.
#![allow(dead_code)]

use romshelf::db::Database;
use romshelf::import::{ImportQueueItem, ImportService, ImporterHandle, ItemState};
use romshelf::lookup::MetadataBackend;
use romshelf::storage::StorageManager;
use romshelf::test_support;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Start a pipeline over local storage in `data_dir` with the given
/// backends. Returns the handle plus a database connection for
/// assertions.
pub async fn start_pipeline(
    data_dir: &Path,
    backends: Vec<Arc<dyn MetadataBackend>>,
) -> (ImporterHandle, Database) {
    let config = test_support::test_config(data_dir);
    let storage = StorageManager::local(config.storage_root.clone()).unwrap();
    start_pipeline_with_storage(data_dir, storage, backends).await
}

/// Same as `start_pipeline` but with caller-supplied storage (fault
/// injection).
pub async fn start_pipeline_with_storage(
    data_dir: &Path,
    storage: StorageManager,
    backends: Vec<Arc<dyn MetadataBackend>>,
) -> (ImporterHandle, Database) {
    let config = test_support::test_config(data_dir);
    let context = test_support::test_context(config, storage, backends).await;
    let db = context.db.clone();
    let handle = ImportService::start(tokio::runtime::Handle::current(), context);
    (handle, db)
}

/// Poll until the item reaches `state`, panicking after 10 seconds.
pub async fn wait_for_state(
    handle: &ImporterHandle,
    item_id: &str,
    state: ItemState,
) -> ImportQueueItem {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(item) = handle.item(item_id) {
            if item.state == state {
                return item;
            }
            if tokio::time::Instant::now() > deadline {
                panic!(
                    "item {} stuck in {} waiting for {}",
                    item_id,
                    item.state.as_str(),
                    state.as_str()
                );
            }
        } else if tokio::time::Instant::now() > deadline {
            panic!("item {} disappeared waiting for {}", item_id, state.as_str());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll until the item has failed permanently: state `failed` with every
/// attempt consumed, and no pending retry flips it back to `queued`.
pub async fn wait_for_permanent_failure(
    handle: &ImporterHandle,
    item_id: &str,
    max_attempts: u32,
) -> ImportQueueItem {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(item) = handle.item(item_id) {
            if item.state == ItemState::Failed && item.retry_count >= max_attempts {
                // Give a lingering backoff timer a chance to prove us wrong
                tokio::time::sleep(Duration::from_millis(100)).await;
                let settled = handle.item(item_id).unwrap();
                assert_eq!(settled.state, ItemState::Failed);
                return settled;
            }
        }
        if tokio::time::Instant::now() > deadline {
            let state = handle.item(item_id).map(|i| (i.state, i.retry_count));
            panic!("item {} never failed permanently: {:?}", item_id, state);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
