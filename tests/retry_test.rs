// Retry policy: transient backend failures are retried with backoff up to
// the attempt bound; permanent errors fail immediately.

mod support;

use romshelf::import::ItemState;
use romshelf::systems::SystemId;
use romshelf::test_support::{self, MockBackend};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

#[tokio::test]
async fn transient_outage_retries_then_succeeds() {
    let temp = TempDir::new().unwrap();
    let rom_bytes = b"flaky backend rom".to_vec();
    let source = test_support::write_fixture(temp.path(), "Game.sfc", &rom_bytes);

    let backend = Arc::new(MockBackend::new("mock", 0));
    backend.add_digest_hit(
        &test_support::md5_hex(&rom_bytes),
        test_support::make_candidate("mock", "Game", SystemId::Snes, "1"),
    );
    // First attempt hits the outage, the retry goes through
    backend.fail_next(1);

    let (handle, db) = support::start_pipeline(temp.path(), vec![backend]).await;

    let id = handle.enqueue(source, None);
    let item = support::wait_for_state(&handle, &id, ItemState::Succeeded).await;

    assert_eq!(item.retry_count, 1);
    assert!(item.last_error.is_some());
    assert_eq!(db.count_entries().await.unwrap(), 1);
}

#[tokio::test]
async fn persistent_outage_exhausts_attempts() {
    let temp = TempDir::new().unwrap();
    let rom_bytes = b"unreachable backend rom".to_vec();
    let source = test_support::write_fixture(temp.path(), "Game.sfc", &rom_bytes);

    let backend = Arc::new(MockBackend::new("mock", 0));
    backend.fail_next(u32::MAX);

    let (handle, db) = support::start_pipeline(temp.path(), vec![backend]).await;

    let id = handle.enqueue(source, None);
    let item = support::wait_for_permanent_failure(&handle, &id, 3).await;

    assert_eq!(item.retry_count, 3);
    assert!(item
        .last_error
        .as_deref()
        .unwrap()
        .contains("scripted outage"));
    assert_eq!(db.count_entries().await.unwrap(), 0);
}

#[tokio::test]
async fn missing_source_fails_without_retry() {
    let temp = TempDir::new().unwrap();
    let backend = Arc::new(MockBackend::new("mock", 0));
    let (handle, db) = support::start_pipeline(temp.path(), vec![backend]).await;

    let id = handle.enqueue(temp.path().join("does-not-exist.sfc"), None);
    let item = support::wait_for_state(&handle, &id, ItemState::Failed).await;

    // IO errors on the source are permanent: retrying cannot make the
    // file appear
    tokio::time::sleep(Duration::from_millis(100)).await;
    let settled = handle.item(&id).unwrap();
    assert_eq!(settled.state, ItemState::Failed);
    assert_eq!(settled.retry_count, 1);
    assert_eq!(db.count_entries().await.unwrap(), 0);
}
