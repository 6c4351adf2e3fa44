// End-to-end pipeline: enqueue a source file, auto-commit on an exact
// digest match, and verify the catalog row, placed file, audit trail, and
// state event ordering.

mod support;

use romshelf::db::AuditAction;
use romshelf::import::ItemState;
use romshelf::package::PackageEnvelope;
use romshelf::systems::SystemId;
use romshelf::test_support::{self, MockBackend};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

#[tokio::test]
async fn exact_digest_match_commits_automatically() {
    let temp = TempDir::new().unwrap();
    let rom_bytes = b"snes rom payload".to_vec();
    let source = test_support::write_fixture(temp.path(), "Chrono Trigger (USA).sfc", &rom_bytes);

    let backend = Arc::new(MockBackend::new("mock", 0));
    backend.add_digest_hit(
        &test_support::md5_hex(&rom_bytes),
        test_support::make_candidate("mock", "Chrono Trigger", SystemId::Snes, "1018"),
    );

    let (handle, db) = support::start_pipeline(temp.path(), vec![backend]).await;
    let mut events = handle.subscribe();

    let id = handle.enqueue(source, None);
    let item = support::wait_for_state(&handle, &id, ItemState::Succeeded).await;

    // Catalog row
    let entry_id = item.entry_id.expect("succeeded item carries its entry id");
    let entry = db.get_entry(&entry_id).await.unwrap().unwrap();
    assert_eq!(entry.title, "Chrono Trigger");
    assert_eq!(entry.system_id, SystemId::Snes);
    assert_eq!(entry.region.as_deref(), Some("USA"));
    assert_eq!(entry.md5, test_support::md5_hex(&rom_bytes));
    assert_eq!(entry.sha1, test_support::sha1_hex(&rom_bytes));
    assert_eq!(entry.size_bytes, rom_bytes.len() as i64);
    assert_eq!(entry.parent_group_id, None);

    // Placed file under the managed root
    let placed = temp.path().join("library").join(&entry.primary_file);
    assert_eq!(std::fs::read(&placed).unwrap(), rom_bytes);
    assert_eq!(entry.primary_file, "roms/snes/Chrono Trigger (USA).sfc");

    // Audit trail
    let audit = db.get_audit_for_subject(&entry_id).await.unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].action, AuditAction::Commit);

    // Digests recorded on the item itself
    let digests = item.digests.unwrap();
    assert_eq!(digests.md5, entry.md5);
    assert!(digests.crc32_headerless.is_none());

    // State events arrive in pipeline order (give the dispatch task a
    // moment to drain)
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let mut observed = Vec::new();
    while let Ok(event) = events.try_recv() {
        if event.item_id == id {
            observed.push(event.state);
        }
    }
    assert_eq!(
        observed,
        vec![
            ItemState::Queued,
            ItemState::Hashing,
            ItemState::Identifying,
            ItemState::Resolving,
            ItemState::Committing,
            ItemState::Succeeded,
        ]
    );
}

#[tokio::test]
async fn unknown_content_parks_for_review() {
    let temp = TempDir::new().unwrap();
    let source = test_support::write_fixture(temp.path(), "Mystery Game.sfc", b"unknown bytes");

    let backend = Arc::new(MockBackend::new("mock", 0));
    let (handle, db) = support::start_pipeline(temp.path(), vec![backend]).await;

    let id = handle.enqueue(source, None);
    let item = support::wait_for_state(&handle, &id, ItemState::NeedsReview).await;

    assert!(item.candidates.is_empty());
    assert_eq!(db.count_entries().await.unwrap(), 0);
    // Nothing was placed
    assert!(!temp.path().join("library/roms").exists());

    // Review items stay until acknowledged
    assert!(handle.item(&id).is_some());
    assert!(handle.acknowledge(&id));
    assert!(handle.item(&id).is_none());
}

#[tokio::test]
async fn review_item_stays_queryable_while_others_commit() {
    let temp = TempDir::new().unwrap();
    let unknown = test_support::write_fixture(temp.path(), "Mystery Game.sfc", b"unknown bytes");
    let known_bytes = b"known rom payload".to_vec();
    let known = test_support::write_fixture(temp.path(), "Known Game.sfc", &known_bytes);

    let backend = Arc::new(MockBackend::new("mock", 0));
    backend.add_digest_hit(
        &test_support::md5_hex(&known_bytes),
        test_support::make_candidate("mock", "Known Game", SystemId::Snes, "1"),
    );

    let (handle, db) = support::start_pipeline(temp.path(), vec![backend]).await;

    // The parked item is enqueued first; the known one commits behind it
    let unknown_id = handle.enqueue(unknown, None);
    let known_id = handle.enqueue(known, None);
    support::wait_for_state(&handle, &known_id, ItemState::Succeeded).await;

    let parked = handle.item(&unknown_id).unwrap();
    assert_eq!(parked.state, ItemState::NeedsReview);
    assert_eq!(db.count_entries().await.unwrap(), 1);

    // Both items remain visible side by side
    let snapshot = handle.snapshot();
    assert_eq!(snapshot.len(), 2);
    assert!(snapshot.iter().any(|i| i.id == unknown_id));
}

#[tokio::test]
async fn cancel_mid_pipeline_leaves_no_partial_state() {
    let temp = TempDir::new().unwrap();
    let rom_bytes = b"soon to be cancelled".to_vec();
    let source = test_support::write_fixture(temp.path(), "Game.sfc", &rom_bytes);

    let backend = Arc::new(MockBackend::new("mock", 0));
    backend.add_digest_hit(
        &test_support::md5_hex(&rom_bytes),
        test_support::make_candidate("mock", "Game", SystemId::Snes, "1"),
    );
    // Hold the item in the identifying stage so the cancel lands mid-flight
    backend.set_delay(std::time::Duration::from_millis(200));

    let (handle, db) = support::start_pipeline(temp.path(), vec![backend]).await;

    let id = handle.enqueue(source, None);
    support::wait_for_state(&handle, &id, ItemState::Identifying).await;
    assert!(handle.cancel(&id));

    let item = support::wait_for_state(&handle, &id, ItemState::Cancelled).await;

    // The unwound item carries no resolution or commit residue
    assert!(item.entry_id.is_none());
    assert!(item.candidates.is_empty());
    assert_eq!(db.count_entries().await.unwrap(), 0);
    assert!(!temp.path().join("library/roms").exists());

    // Cancelled is terminal, so the item can be acknowledged away
    assert!(handle.acknowledge(&id));
}

#[tokio::test]
async fn tied_candidates_park_for_review() {
    let temp = TempDir::new().unwrap();
    let rom_bytes = b"ambiguous rom".to_vec();
    let source = test_support::write_fixture(temp.path(), "Game.sfc", &rom_bytes);
    let md5 = test_support::md5_hex(&rom_bytes);

    // Two backends at the same priority, both claiming an exact match
    let first = Arc::new(MockBackend::new("first", 1));
    first.add_digest_hit(
        &md5,
        test_support::make_candidate("first", "Game v1", SystemId::Snes, "1"),
    );
    let second = Arc::new(MockBackend::new("second", 1));
    second.add_digest_hit(
        &md5,
        test_support::make_candidate("second", "Game v2", SystemId::Snes, "2"),
    );

    let (handle, db) = support::start_pipeline(temp.path(), vec![first, second]).await;

    let id = handle.enqueue(source, None);
    let item = support::wait_for_state(&handle, &id, ItemState::NeedsReview).await;

    assert_eq!(item.candidates.len(), 2);
    assert_eq!(db.count_entries().await.unwrap(), 0);
}

#[tokio::test]
async fn packages_persist_through_the_committer() {
    let temp = TempDir::new().unwrap();
    let backend = Arc::new(MockBackend::new("mock", 0));
    let (handle, db) = support::start_pipeline(temp.path(), vec![backend]).await;

    let envelope = PackageEnvelope::new(
        romshelf::db::PackageKind::SaveState,
        b"save state bytes".to_vec(),
        json!({"slot": 1, "entry": "abc"}),
    );
    let expected_hash = envelope.content_hash();

    let package_id = handle.store_package(envelope).await.unwrap();
    let stored = db.get_package(&package_id).await.unwrap().unwrap();

    assert_eq!(stored.payload, b"save state bytes");
    assert_eq!(stored.content_hash, expected_hash);

    let audit = db.get_audit_for_subject(&package_id).await.unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].action, AuditAction::PackageCommit);
}
