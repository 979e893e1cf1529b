use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pretty_assertions::assert_eq;
use relica_store::RevisionStore;
use relica_sync::{
    CancelFlag, RemoteStore, RemoteSummary, ResourceOutcome, SyncConfig, SyncCoordinator,
    SyncError, SyncResult,
};
use relica_types::{ConflictRecord, ResolveStrategy, ResourceId, ResourceSlot, RevisionRecord};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

fn ts(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap()
}

fn rev(id: ResourceId, n: u32) -> RevisionRecord {
    RevisionRecord::new(id, n, Some(ts(i64::from(n) * 1_000)))
}

/// In-memory server double with per-call failure injection.
#[derive(Default)]
struct MockRemote {
    revisions: Mutex<HashMap<ResourceId, Vec<RevisionRecord>>>,
    deleted: Mutex<Vec<(ResourceId, DateTime<Utc>)>>,
    fail_summaries: AtomicBool,
    fail_downloads: Mutex<HashSet<ResourceId>>,
    cancel_on_download: Mutex<Option<CancelFlag>>,
}

impl MockRemote {
    fn seed(&self, id: ResourceId, numbers: &[u32]) {
        let records = numbers.iter().map(|&n| rev(id, n)).collect();
        self.revisions.lock().unwrap().insert(id, records);
    }

    fn numbers(&self, id: ResourceId) -> Vec<u32> {
        self.revisions
            .lock()
            .unwrap()
            .get(&id)
            .map(|records| records.iter().map(|r| r.revision).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl RemoteStore for MockRemote {
    async fn fetch_summary(
        &self,
        ids: &[ResourceId],
    ) -> SyncResult<HashMap<ResourceId, RemoteSummary>> {
        if self.fail_summaries.load(Ordering::SeqCst) {
            return Err(SyncError::Connection("connection refused".to_string()));
        }
        let revisions = self.revisions.lock().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| {
                revisions.get(id).map(|records| {
                    let summary = RemoteSummary {
                        latest_revision: records.last().map(|r| r.revision),
                        revision_count: records.len(),
                    };
                    (*id, summary)
                })
            })
            .collect())
    }

    async fn fetch_revisions(&self, id: ResourceId) -> SyncResult<Vec<RevisionRecord>> {
        Ok(self
            .revisions
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }

    async fn download_revisions(
        &self,
        id: ResourceId,
        after: Option<u32>,
    ) -> SyncResult<Vec<RevisionRecord>> {
        if let Some(flag) = self.cancel_on_download.lock().unwrap().as_ref() {
            flag.set();
        }
        if self.fail_downloads.lock().unwrap().contains(&id) {
            return Err(SyncError::Connection("connection reset".to_string()));
        }
        let records = self.fetch_revisions(id).await?;
        Ok(records
            .into_iter()
            .filter(|r| after.map_or(true, |a| r.revision > a))
            .collect())
    }

    async fn upload_revisions(&self, id: ResourceId, records: &[RevisionRecord]) -> SyncResult<()> {
        self.revisions
            .lock()
            .unwrap()
            .entry(id)
            .or_default()
            .extend_from_slice(records);
        Ok(())
    }

    async fn overwrite_revisions(
        &self,
        id: ResourceId,
        after: Option<u32>,
        records: &[RevisionRecord],
    ) -> SyncResult<()> {
        let mut revisions = self.revisions.lock().unwrap();
        let history = revisions.entry(id).or_default();
        match after {
            Some(after) => history.retain(|r| r.revision <= after),
            None => history.clear(),
        }
        history.extend_from_slice(records);
        Ok(())
    }

    async fn push_deleted(&self, id: ResourceId) -> SyncResult<()> {
        self.deleted.lock().unwrap().push((id, Utc::now()));
        Ok(())
    }

    async fn deleted_since(&self, since: DateTime<Utc>) -> SyncResult<Vec<ResourceId>> {
        Ok(self
            .deleted
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, at)| *at > since)
            .map(|(id, _)| *id)
            .collect())
    }
}

fn setup() -> (RevisionStore, Arc<MockRemote>, SyncCoordinator) {
    let store = RevisionStore::open_in_memory().unwrap();
    let remote = Arc::new(MockRemote::default());
    let coordinator = SyncCoordinator::new(store.clone(), remote.clone());
    (store, remote, coordinator)
}

fn add_local(store: &RevisionStore, id: ResourceId, numbers: &[u32]) {
    store.add(id, ResourceSlot::Level).unwrap();
    for &n in numbers {
        store
            .add_revision(id, n, Some(ts(i64::from(n) * 1_000)))
            .unwrap();
    }
}

fn local_numbers(store: &RevisionStore, id: ResourceId) -> Vec<u32> {
    store
        .revisions(id)
        .unwrap()
        .iter()
        .map(|r| r.revision)
        .collect()
}

// ── Comparison outcomes ─────────────────────────────────────────

#[tokio::test]
async fn identical_histories_are_in_sync() {
    let (store, remote, coordinator) = setup();
    let id = ResourceId::new();
    add_local(&store, id, &[0, 1, 2]);
    remote.seed(id, &[0, 1, 2]);

    let report = coordinator.sync(&[id]).await.unwrap();
    assert_eq!(report.outcomes[&id], ResourceOutcome::InSync);
    assert!(coordinator.is_idle().await);
}

#[tokio::test]
async fn local_prefix_downloads_the_remote_tail() {
    let (store, remote, coordinator) = setup();
    let id = ResourceId::new();
    add_local(&store, id, &[0, 1]);
    remote.seed(id, &[0, 1, 2, 3]);

    let report = coordinator.sync(&[id]).await.unwrap();
    assert_eq!(report.outcomes[&id], ResourceOutcome::Downloaded(2));
    assert_eq!(local_numbers(&store, id), vec![0, 1, 2, 3]);
    // Downloaded revisions arrive already marked as synchronized.
    assert!(!store.unsynced_revisions().unwrap().contains_key(&id));
}

#[tokio::test]
async fn empty_local_history_downloads_everything() {
    let (store, remote, coordinator) = setup();
    let id = ResourceId::new();
    store.add(id, ResourceSlot::Enemy).unwrap();
    remote.seed(id, &[0, 1, 2]);

    let report = coordinator.sync(&[id]).await.unwrap();
    assert_eq!(report.outcomes[&id], ResourceOutcome::Downloaded(3));
    assert_eq!(local_numbers(&store, id), vec![0, 1, 2]);
}

#[tokio::test]
async fn remote_prefix_uploads_the_local_tail() {
    let (store, remote, coordinator) = setup();
    let id = ResourceId::new();
    add_local(&store, id, &[0, 1, 2]);
    remote.seed(id, &[0]);

    let report = coordinator.sync(&[id]).await.unwrap();
    assert_eq!(report.outcomes[&id], ResourceOutcome::Uploaded(2));
    assert_eq!(remote.numbers(id), vec![0, 1, 2]);
    assert!(!store.unsynced_revisions().unwrap().contains_key(&id));
}

#[tokio::test]
async fn unknown_remote_resource_uploads_full_history() {
    let (store, remote, coordinator) = setup();
    let id = ResourceId::new();
    add_local(&store, id, &[0, 1]);

    let report = coordinator.sync(&[id]).await.unwrap();
    assert_eq!(report.outcomes[&id], ResourceOutcome::Uploaded(2));
    assert_eq!(remote.numbers(id), vec![0, 1]);
}

// ── Conflicts ───────────────────────────────────────────────────

#[tokio::test]
async fn diverged_histories_conflict_at_last_common_revision() {
    let (store, remote, coordinator) = setup();
    let id = ResourceId::new();
    add_local(&store, id, &[0, 1, 2]);
    remote.seed(id, &[0, 1, 3, 4]);

    let report = coordinator.sync(&[id]).await.unwrap();
    let expected = ConflictRecord {
        resource_id: id,
        from_revision: 1,
    };
    assert_eq!(report.outcomes[&id], ResourceOutcome::Conflicted(expected));
    assert_eq!(coordinator.pending_conflicts().await, vec![expected]);
    assert!(!coordinator.is_idle().await);

    // Nothing moved in either direction.
    assert_eq!(local_numbers(&store, id), vec![0, 1, 2]);
    assert_eq!(remote.numbers(id), vec![0, 1, 3, 4]);
}

#[tokio::test]
async fn keep_remote_installs_the_remote_history() {
    let (store, remote, coordinator) = setup();
    let id = ResourceId::new();
    add_local(&store, id, &[0, 1, 2]);
    remote.seed(id, &[0, 1, 3, 4]);

    coordinator.sync(&[id]).await.unwrap();
    coordinator
        .resolve(id, ResolveStrategy::KeepRemote)
        .await
        .unwrap();

    assert_eq!(local_numbers(&store, id), vec![0, 1, 3, 4]);
    assert!(coordinator.is_idle().await);
    assert!(coordinator.pending_conflicts().await.is_empty());
}

#[tokio::test]
async fn keep_local_overwrites_the_remote_history() {
    let (store, remote, coordinator) = setup();
    let id = ResourceId::new();
    add_local(&store, id, &[0, 1, 2]);
    remote.seed(id, &[0, 1, 3, 4]);

    coordinator.sync(&[id]).await.unwrap();
    coordinator
        .resolve(id, ResolveStrategy::KeepLocal)
        .await
        .unwrap();

    assert_eq!(remote.numbers(id), vec![0, 1, 2]);
    assert_eq!(local_numbers(&store, id), vec![0, 1, 2]);
    assert!(!store.unsynced_revisions().unwrap().contains_key(&id));
    assert!(coordinator.is_idle().await);
}

#[tokio::test]
async fn no_common_revision_conflicts_from_zero() {
    let (store, remote, coordinator) = setup();
    let id = ResourceId::new();
    add_local(&store, id, &[1, 2]);
    remote.seed(id, &[3, 4]);

    let report = coordinator.sync(&[id]).await.unwrap();
    assert_eq!(
        report.outcomes[&id],
        ResourceOutcome::Conflicted(ConflictRecord {
            resource_id: id,
            from_revision: 0,
        })
    );

    coordinator
        .resolve(id, ResolveStrategy::KeepRemote)
        .await
        .unwrap();
    assert_eq!(local_numbers(&store, id), vec![3, 4]);
}

#[tokio::test]
async fn keep_remote_discards_a_non_common_local_revision_zero() {
    let (store, remote, coordinator) = setup();
    let id = ResourceId::new();
    // Local holds revision 0 but the remote never saw it, so nothing is
    // actually common despite the conflict sitting at revision 0.
    add_local(&store, id, &[0, 1]);
    remote.seed(id, &[2, 3]);

    let report = coordinator.sync(&[id]).await.unwrap();
    assert_eq!(
        report.outcomes[&id],
        ResourceOutcome::Conflicted(ConflictRecord {
            resource_id: id,
            from_revision: 0,
        })
    );

    coordinator
        .resolve(id, ResolveStrategy::KeepRemote)
        .await
        .unwrap();
    assert_eq!(local_numbers(&store, id), vec![2, 3]);
}

#[tokio::test]
async fn keep_local_uploads_a_non_common_local_revision_zero() {
    let (store, remote, coordinator) = setup();
    let id = ResourceId::new();
    add_local(&store, id, &[0, 1]);
    remote.seed(id, &[2, 3]);

    coordinator.sync(&[id]).await.unwrap();
    coordinator
        .resolve(id, ResolveStrategy::KeepLocal)
        .await
        .unwrap();

    // The entire local history becomes the remote one, revision 0 included.
    assert_eq!(remote.numbers(id), vec![0, 1]);
    assert_eq!(local_numbers(&store, id), vec![0, 1]);
    assert!(!store.unsynced_revisions().unwrap().contains_key(&id));
}

#[tokio::test]
async fn keep_remote_preserves_a_genuinely_common_revision_zero() {
    let (store, remote, coordinator) = setup();
    let id = ResourceId::new();
    add_local(&store, id, &[0, 5]);
    remote.seed(id, &[0, 7]);

    coordinator.sync(&[id]).await.unwrap();
    coordinator
        .resolve(id, ResolveStrategy::KeepRemote)
        .await
        .unwrap();
    assert_eq!(local_numbers(&store, id), vec![0, 7]);
}

#[tokio::test]
async fn resolving_without_a_conflict_errors() {
    let (_, _, coordinator) = setup();
    let id = ResourceId::new();
    let err = coordinator
        .resolve(id, ResolveStrategy::KeepLocal)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::UnknownConflict(got) if got == id));
}

// ── Failure isolation ───────────────────────────────────────────

#[tokio::test]
async fn summary_fetch_failure_aborts_the_session() {
    let (store, remote, coordinator) = setup();
    let id = ResourceId::new();
    add_local(&store, id, &[0]);
    remote.fail_summaries.store(true, Ordering::SeqCst);

    let err = coordinator.sync(&[id]).await.unwrap_err();
    assert!(matches!(err, SyncError::Connection(_)));
    assert!(coordinator.is_idle().await);
}

#[tokio::test]
async fn one_failing_resource_does_not_abort_the_batch() {
    let (store, remote, coordinator) = setup();
    let healthy = ResourceId::new();
    let broken = ResourceId::new();
    add_local(&store, healthy, &[0]);
    add_local(&store, broken, &[0]);
    remote.seed(healthy, &[0, 1]);
    remote.seed(broken, &[0, 1]);
    remote.fail_downloads.lock().unwrap().insert(broken);

    let report = coordinator.sync(&[healthy, broken]).await.unwrap();
    assert_eq!(report.outcomes[&healthy], ResourceOutcome::Downloaded(1));
    assert!(matches!(
        report.outcomes[&broken],
        ResourceOutcome::Failed { .. }
    ));
    assert!(!report.is_clean());
    assert!(coordinator.is_idle().await);
}

#[tokio::test]
async fn failed_resolution_keeps_the_conflict_pending() {
    let (store, remote, coordinator) = setup();
    let id = ResourceId::new();
    add_local(&store, id, &[0, 1, 2]);
    remote.seed(id, &[0, 1, 3]);

    coordinator.sync(&[id]).await.unwrap();
    remote.fail_downloads.lock().unwrap().insert(id);

    let err = coordinator
        .resolve(id, ResolveStrategy::KeepRemote)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Connection(_)));
    assert_eq!(coordinator.pending_conflicts().await.len(), 1);
    assert_eq!(local_numbers(&store, id), vec![0, 1, 2]);

    // The retained conflict resolves once the server recovers.
    remote.fail_downloads.lock().unwrap().clear();
    coordinator
        .resolve(id, ResolveStrategy::KeepRemote)
        .await
        .unwrap();
    assert_eq!(local_numbers(&store, id), vec![0, 1, 3]);
}

// ── Cancellation ────────────────────────────────────────────────

#[tokio::test]
async fn cancellation_skips_unscheduled_resources() {
    let store = RevisionStore::open_in_memory().unwrap();
    let remote = Arc::new(MockRemote::default());
    let coordinator = SyncCoordinator::with_config(
        store.clone(),
        remote.clone(),
        SyncConfig {
            max_concurrent_transfers: 1,
            ..SyncConfig::default()
        },
    );

    let first = ResourceId::new();
    let second = ResourceId::new();
    add_local(&store, first, &[0]);
    add_local(&store, second, &[0]);
    remote.seed(first, &[0, 1]);
    remote.seed(second, &[0, 1]);

    // The first download trips the cancel flag mid-session.
    *remote.cancel_on_download.lock().unwrap() = Some(coordinator.cancel_flag());

    let report = coordinator.sync(&[first, second]).await.unwrap();
    assert_eq!(report.outcomes[&first], ResourceOutcome::Downloaded(1));
    assert_eq!(report.outcomes[&second], ResourceOutcome::Cancelled);

    // The completed transfer is committed; the cancelled one untouched.
    assert_eq!(local_numbers(&store, first), vec![0, 1]);
    assert_eq!(local_numbers(&store, second), vec![0]);
    assert!(coordinator.is_idle().await);
}

#[tokio::test]
async fn a_new_session_clears_a_stale_cancel_flag() {
    let (store, remote, coordinator) = setup();
    let id = ResourceId::new();
    add_local(&store, id, &[0]);
    remote.seed(id, &[0, 1]);

    coordinator.cancel_flag().set();
    let report = coordinator.sync(&[id]).await.unwrap();
    assert_eq!(report.outcomes[&id], ResourceOutcome::Downloaded(1));
}

// ── Deletion propagation ────────────────────────────────────────

#[tokio::test]
async fn deletions_flow_both_ways() {
    let (store, remote, coordinator) = setup();
    let local_gone = ResourceId::new();
    let remote_gone = ResourceId::new();

    store.add(local_gone, ResourceSlot::Ship).unwrap();
    store.remove(local_gone).unwrap();
    store.mark_removed(local_gone).unwrap();

    add_local(&store, remote_gone, &[0, 1]);
    remote
        .deleted
        .lock()
        .unwrap()
        .push((remote_gone, Utc::now()));

    let summary = coordinator.sync_deletions(ts(0)).await.unwrap();
    assert_eq!(summary.pushed, 1);
    // The pushed tombstone also comes back in deleted_since; removing an
    // already-absent local entry is a no-op.
    assert_eq!(summary.removed_locally, 2);

    assert!(store.removed_resources().unwrap().is_empty());
    assert!(!store.exists(remote_gone).unwrap());
    assert!(store.revisions(remote_gone).unwrap().is_empty());
    assert!(remote
        .deleted
        .lock()
        .unwrap()
        .iter()
        .any(|(id, _)| *id == local_gone));
}
