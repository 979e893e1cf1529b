use chrono::{DateTime, Utc};
use relica_server::{BackupEnumerator, BlobBindery, BlobVault, RecordStore};
use relica_types::{ResourceId, SyncCheckpoint};
use std::collections::HashMap;
use std::sync::Arc;

fn ts(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap()
}

fn setup() -> (Arc<RecordStore>, Arc<BlobVault>, BackupEnumerator) {
    let records = Arc::new(RecordStore::open_in_memory().unwrap());
    let vault = Arc::new(BlobVault::open_in_memory().unwrap());
    let enumerator = BackupEnumerator::new(records.clone());
    (records, vault, enumerator)
}

fn bind(records: &Arc<RecordStore>, vault: &Arc<BlobVault>, field: String, data: &[u8]) {
    let key = vault.store(data).unwrap();
    let report =
        BlobBindery::new(records.clone(), vault.clone()).bind_uploads(&HashMap::from([(field, key)]));
    assert_eq!(report.bound, 1);
}

// ── Checkpoint semantics ────────────────────────────────────────

#[test]
fn epoch_checkpoint_sees_everything() {
    let (records, vault, enumerator) = setup();
    let published = ResourceId::new();
    let user = ResourceId::new();
    records.insert_published(published, None, ts(1_000)).unwrap();
    records
        .insert_user_revision(user, 0, ts(500), ts(2_000))
        .unwrap();
    bind(&records, &vault, published.to_string(), b"pub");
    bind(&records, &vault, format!("{user}_0"), b"rev");

    let delta = enumerator.enumerate_since(SyncCheckpoint::epoch()).unwrap();
    assert_eq!(delta.published.len(), 1);
    assert_eq!(delta.user_revisions.len(), 1);
    assert_eq!(delta.published[0].resource_id, published);
    assert_eq!(delta.user_revisions[0].resource_id, user);
    assert_eq!(delta.user_revisions[0].revision, Some(0));
}

#[test]
fn same_checkpoint_yields_same_delta() {
    let (records, vault, enumerator) = setup();
    let id = ResourceId::new();
    records
        .insert_user_revision(id, 0, ts(500), ts(2_000))
        .unwrap();
    bind(&records, &vault, format!("{id}_0"), b"rev");

    let checkpoint = SyncCheckpoint::at(ts(1_000));
    let first = enumerator.enumerate_since(checkpoint).unwrap();
    let second = enumerator.enumerate_since(checkpoint).unwrap();
    assert_eq!(first.user_revisions, second.user_revisions);
    assert_eq!(first.published, second.published);
}

#[test]
fn advanced_checkpoint_excludes_archived_records() {
    let (records, vault, enumerator) = setup();
    let early = ResourceId::new();
    let late = ResourceId::new();
    records
        .insert_user_revision(early, 0, ts(100), ts(1_000))
        .unwrap();
    records
        .insert_user_revision(late, 0, ts(100), ts(5_000))
        .unwrap();
    bind(&records, &vault, format!("{early}_0"), b"early");
    bind(&records, &vault, format!("{late}_0"), b"late");

    let mut checkpoint = SyncCheckpoint::epoch();
    let full = enumerator.enumerate_since(checkpoint).unwrap();
    assert_eq!(full.user_revisions.len(), 2);

    checkpoint.advance_to(ts(1_000));
    let tail = enumerator.enumerate_since(checkpoint).unwrap();
    assert_eq!(tail.user_revisions.len(), 1);
    assert_eq!(tail.user_revisions[0].resource_id, late);
}

#[test]
fn record_at_exactly_the_checkpoint_is_excluded() {
    let (records, vault, enumerator) = setup();
    let id = ResourceId::new();
    records
        .insert_user_revision(id, 0, ts(100), ts(1_000))
        .unwrap();
    bind(&records, &vault, format!("{id}_0"), b"rev");

    let delta = enumerator
        .enumerate_since(SyncCheckpoint::at(ts(1_000)))
        .unwrap();
    assert!(delta.is_empty());
}

// ── Blob-less and companion records ─────────────────────────────

#[test]
fn records_without_blobs_are_skipped() {
    let (records, _, enumerator) = setup();
    let id = ResourceId::new();
    records.insert_published(id, None, ts(1_000)).unwrap();
    records
        .insert_user_revision(id, 0, ts(100), ts(1_000))
        .unwrap();

    let delta = enumerator.enumerate_since(SyncCheckpoint::epoch()).unwrap();
    assert!(delta.is_empty());
}

#[test]
fn companion_blob_enumerates_under_its_own_id() {
    let (records, vault, enumerator) = setup();
    let primary = ResourceId::new();
    let companion = ResourceId::new();
    records
        .insert_published(primary, Some(companion), ts(1_000))
        .unwrap();
    bind(&records, &vault, primary.to_string(), b"meta");
    bind(&records, &vault, companion.to_string(), b"playable");

    let delta = enumerator.enumerate_since(SyncCheckpoint::epoch()).unwrap();
    assert_eq!(delta.published.len(), 2);

    let ids: Vec<ResourceId> = delta.published.iter().map(|e| e.resource_id).collect();
    assert!(ids.contains(&primary));
    assert!(ids.contains(&companion));
    assert!(delta.published.iter().all(|e| e.revision.is_none()));
    assert!(delta.published.iter().all(|e| e.created == ts(1_000)));
}
