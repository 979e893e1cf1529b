//! Sync coordinator — drives a local revision ledger against a remote
//! store.
//!
//! One session compares the two histories per resource, then schedules
//! uploads and downloads concurrently across resources (bounded), strictly
//! sequentially within each resource. Failures are per-resource; the batch
//! never aborts as a whole once comparison data is in hand. Divergent
//! histories surface as conflicts that block the resource until an
//! explicit resolution.

use crate::error::{SyncError, SyncResult};
use crate::remote::{RemoteStore, RemoteSummary};
use crate::state::{SessionState, SyncPhase};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use relica_store::{RevisionStore, StoreError};
use relica_types::{
    ConflictRecord, ResolveStrategy, ResourceId, ResponseStatus, RevisionRecord,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Configuration for the sync coordinator.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Maximum resources transferring at once.
    pub max_concurrent_transfers: usize,
    /// Timeout for remote operations (ms). Enforced by the transport behind
    /// [`RemoteStore`]; carried here so callers configure it in one place.
    pub timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrent_transfers: 4,
            timeout_ms: 30_000,
        }
    }
}

/// Cancellation flag shared between a coordinator and its caller.
///
/// Setting it stops the session between per-resource transfers; a transfer
/// already in flight completes or fails atomically.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Requests cancellation.
    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// True once cancellation was requested.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Outcome of one resource in a sync session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceOutcome {
    /// Histories were already identical.
    InSync,
    /// Local tail uploaded; counts the revisions sent.
    Uploaded(usize),
    /// Remote tail downloaded and installed; counts the revisions received.
    Downloaded(usize),
    /// Histories diverged. Blocked until resolved.
    Conflicted(ConflictRecord),
    /// This resource failed; others proceeded independently.
    Failed {
        status: ResponseStatus,
        message: String,
    },
    /// Cancellation was requested before this resource was scheduled.
    Cancelled,
}

/// Per-resource outcomes of one sync session.
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Outcome per requested resource.
    pub outcomes: HashMap<ResourceId, ResourceOutcome>,
}

impl SyncReport {
    /// Conflicts detected in this session, sorted by resource id.
    #[must_use]
    pub fn conflicts(&self) -> Vec<ConflictRecord> {
        let mut conflicts: Vec<ConflictRecord> = self
            .outcomes
            .values()
            .filter_map(|o| match o {
                ResourceOutcome::Conflicted(c) => Some(*c),
                _ => None,
            })
            .collect();
        conflicts.sort_by_key(|c| c.resource_id);
        conflicts
    }

    /// True when every resource ended in sync (possibly after a transfer).
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.outcomes.values().all(|o| {
            matches!(
                o,
                ResourceOutcome::InSync
                    | ResourceOutcome::Uploaded(_)
                    | ResourceOutcome::Downloaded(_)
            )
        })
    }
}

/// Deletions exchanged by [`SyncCoordinator::sync_deletions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeletionSummary {
    /// Local deletions pushed to the server.
    pub pushed: usize,
    /// Server tombstones applied locally.
    pub removed_locally: usize,
}

/// What comparison decided for one resource.
enum Plan {
    InSync,
    Download { after: Option<u32> },
    Upload { tail: Vec<RevisionRecord> },
    Conflict(ConflictRecord),
}

/// Drives synchronization between a [`RevisionStore`] and a [`RemoteStore`].
pub struct SyncCoordinator {
    store: RevisionStore,
    remote: Arc<dyn RemoteStore>,
    state: Arc<RwLock<SessionState>>,
    config: SyncConfig,
    cancel: CancelFlag,
}

impl SyncCoordinator {
    /// Creates a coordinator with the default configuration.
    pub fn new(store: RevisionStore, remote: Arc<dyn RemoteStore>) -> Self {
        Self::with_config(store, remote, SyncConfig::default())
    }

    /// Creates a coordinator with an explicit configuration.
    pub fn with_config(
        store: RevisionStore,
        remote: Arc<dyn RemoteStore>,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            remote,
            state: Arc::new(RwLock::new(SessionState::default())),
            config,
            cancel: CancelFlag::default(),
        }
    }

    /// The cancellation flag for the current and future sessions. Starting
    /// a new session clears it.
    #[must_use]
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// True when no resource is transferring or conflicted.
    pub async fn is_idle(&self) -> bool {
        self.state.read().await.is_idle()
    }

    /// Pending conflicts, sorted by resource id.
    pub async fn pending_conflicts(&self) -> Vec<ConflictRecord> {
        self.state.read().await.conflicts()
    }

    /// Runs one sync session over the given resources.
    ///
    /// Errors only when the initial summary fetch fails; from then on each
    /// resource reports its own outcome.
    pub async fn sync(&self, ids: &[ResourceId]) -> SyncResult<SyncReport> {
        self.cancel.clear();

        {
            let mut state = self.state.write().await;
            for &id in ids {
                state.set_phase(id, SyncPhase::Comparing);
            }
        }

        let summaries = match self.remote.fetch_summary(ids).await {
            Ok(summaries) => summaries,
            Err(e) => {
                warn!("summary fetch failed, session aborted: {e}");
                let mut state = self.state.write().await;
                for &id in ids {
                    state.set_phase(id, SyncPhase::Idle);
                }
                return Err(e);
            }
        };

        let mut report = SyncReport::default();
        let mut transfers = Vec::new();

        for &id in ids {
            match self.plan_resource(id, summaries.get(&id)).await {
                Ok(Plan::InSync) => {
                    self.state.write().await.set_phase(id, SyncPhase::Idle);
                    report.outcomes.insert(id, ResourceOutcome::InSync);
                }
                Ok(Plan::Conflict(conflict)) => {
                    info!(
                        "resource {id} diverged from revision {}",
                        conflict.from_revision
                    );
                    self.state.write().await.record_conflict(conflict);
                    report
                        .outcomes
                        .insert(id, ResourceOutcome::Conflicted(conflict));
                }
                Ok(plan) => transfers.push((id, plan)),
                Err(e) => {
                    warn!("comparison failed for {id}: {e}");
                    self.state.write().await.set_phase(id, SyncPhase::Idle);
                    report.outcomes.insert(id, Self::failed(&e));
                }
            }
        }

        let outcomes: Vec<(ResourceId, ResourceOutcome)> = stream::iter(transfers)
            .map(|(id, plan)| self.transfer(id, plan))
            .buffer_unordered(self.config.max_concurrent_transfers.max(1))
            .collect()
            .await;
        for (id, outcome) in outcomes {
            report.outcomes.insert(id, outcome);
        }

        info!(
            "sync session over {} resources: {} conflicts",
            ids.len(),
            report.conflicts().len()
        );
        Ok(report)
    }

    /// Resolves a pending conflict. Irreversible; the resource unblocks on
    /// success and stays conflicted if the resolution transfer fails.
    pub async fn resolve(&self, id: ResourceId, strategy: ResolveStrategy) -> SyncResult<()> {
        let conflict = self
            .state
            .write()
            .await
            .take_conflict(id)
            .ok_or(SyncError::UnknownConflict(id))?;

        let result = match strategy {
            ResolveStrategy::KeepLocal => self.resolve_keep_local(conflict).await,
            ResolveStrategy::KeepRemote => self.resolve_keep_remote(conflict).await,
        };

        match result {
            Ok(()) => {
                info!("conflict on {id} resolved with {strategy:?}");
                self.state.write().await.set_phase(id, SyncPhase::Idle);
                Ok(())
            }
            Err(e) => {
                warn!("resolution of {id} failed, conflict retained: {e}");
                self.state.write().await.record_conflict(conflict);
                Err(e)
            }
        }
    }

    /// Exchanges deletions with the server. Local removals are pushed as
    /// tombstones and cleared; server tombstones newer than `since` remove
    /// the corresponding local entries.
    pub async fn sync_deletions(&self, since: DateTime<Utc>) -> SyncResult<DeletionSummary> {
        let mut summary = DeletionSummary::default();

        for id in self.with_store(|s| s.removed_resources()).await? {
            self.remote.push_deleted(id).await?;
            self.with_store(move |s| s.unmark_removed(id)).await?;
            summary.pushed += 1;
        }

        for id in self.remote.deleted_since(since).await? {
            self.with_store(move |s| {
                s.remove_revisions(id)?;
                s.remove(id)
            })
            .await?;
            summary.removed_locally += 1;
        }

        if summary.pushed > 0 || summary.removed_locally > 0 {
            info!(
                "deletion sync: pushed {}, removed {} locally",
                summary.pushed, summary.removed_locally
            );
        }
        Ok(summary)
    }

    // ── Comparison ───────────────────────────────────────────────

    async fn plan_resource(
        &self,
        id: ResourceId,
        summary: Option<&RemoteSummary>,
    ) -> SyncResult<Plan> {
        let local = self.with_store(move |s| s.revisions(id)).await?;
        let local_nums: Vec<u32> = local.iter().map(|r| r.revision).collect();

        let remote_empty = summary.map_or(true, |s| s.revision_count == 0);
        if remote_empty {
            return Ok(if local.is_empty() {
                Plan::InSync
            } else {
                Plan::Upload { tail: local }
            });
        }

        // Summary fast path: same latest and same count means identical for
        // append-only histories.
        if let Some(summary) = summary {
            if summary.latest_revision == local_nums.last().copied()
                && summary.revision_count == local_nums.len()
            {
                return Ok(Plan::InSync);
            }
        }

        let remote = self.remote.fetch_revisions(id).await?;
        let remote_nums: Vec<u32> = remote.iter().map(|r| r.revision).collect();
        debug!("comparing {id}: local {local_nums:?} vs remote {remote_nums:?}");

        Ok(Self::compare(id, &local, &local_nums, &remote_nums))
    }

    fn compare(
        id: ResourceId,
        local: &[RevisionRecord],
        local_nums: &[u32],
        remote_nums: &[u32],
    ) -> Plan {
        if local_nums == remote_nums {
            return Plan::InSync;
        }
        if remote_nums.starts_with(local_nums) {
            return Plan::Download {
                after: local_nums.last().copied(),
            };
        }
        if local_nums.starts_with(remote_nums) {
            return Plan::Upload {
                tail: local[remote_nums.len()..].to_vec(),
            };
        }

        let common = local_nums
            .iter()
            .zip(remote_nums)
            .take_while(|(a, b)| a == b)
            .count();
        let from_revision = common.checked_sub(1).map_or(0, |i| local_nums[i]);
        Plan::Conflict(ConflictRecord {
            resource_id: id,
            from_revision,
        })
    }

    // ── Transfers ────────────────────────────────────────────────

    async fn transfer(&self, id: ResourceId, plan: Plan) -> (ResourceId, ResourceOutcome) {
        if self.cancel.is_set() {
            self.state.write().await.set_phase(id, SyncPhase::Idle);
            return (id, ResourceOutcome::Cancelled);
        }

        let outcome = match plan {
            Plan::Download { after } => {
                self.state.write().await.set_phase(id, SyncPhase::Downloading);
                match self.run_download(id, after).await {
                    Ok(n) => ResourceOutcome::Downloaded(n),
                    Err(e) => {
                        warn!("download of {id} failed: {e}");
                        Self::failed(&e)
                    }
                }
            }
            Plan::Upload { tail } => {
                self.state.write().await.set_phase(id, SyncPhase::Uploading);
                match self.run_upload(id, tail).await {
                    Ok(n) => ResourceOutcome::Uploaded(n),
                    Err(e) => {
                        warn!("upload of {id} failed: {e}");
                        Self::failed(&e)
                    }
                }
            }
            Plan::InSync | Plan::Conflict(_) => unreachable!("handled before scheduling"),
        };

        self.state.write().await.set_phase(id, SyncPhase::Idle);
        (id, outcome)
    }

    async fn run_download(&self, id: ResourceId, after: Option<u32>) -> SyncResult<usize> {
        let records = self.remote.download_revisions(id, after).await?;
        let count = records.len();
        self.with_store(move |s| s.install_revisions(id, &records))
            .await?;
        debug!("downloaded {count} revisions of {id}");
        Ok(count)
    }

    async fn run_upload(&self, id: ResourceId, tail: Vec<RevisionRecord>) -> SyncResult<usize> {
        let (first, last) = match (tail.first(), tail.last()) {
            (Some(first), Some(last)) => (first.revision, last.revision),
            _ => return Ok(0),
        };
        self.remote.upload_revisions(id, &tail).await?;
        self.with_store(move |s| s.mark_synced(id, first, last))
            .await?;
        debug!("uploaded revisions {first}..={last} of {id}");
        Ok(tail.len())
    }

    // ── Resolution ───────────────────────────────────────────────

    /// Whether `from` is a revision both histories actually hold.
    ///
    /// `from_revision` 0 is ambiguous: comparison records 0 both when
    /// revision 0 is the last common one and when nothing is common at all.
    /// Any larger value only ever comes from a non-empty common prefix.
    async fn conflict_has_common(&self, id: ResourceId, from: u32) -> SyncResult<bool> {
        if from > 0 {
            return Ok(true);
        }
        let local_has = self
            .with_store(move |s| s.revisions(id))
            .await?
            .iter()
            .any(|r| r.revision == from);
        if !local_has {
            return Ok(false);
        }
        let remote = self.remote.fetch_revisions(id).await?;
        Ok(remote.iter().any(|r| r.revision == from))
    }

    async fn resolve_keep_local(&self, conflict: ConflictRecord) -> SyncResult<()> {
        let id = conflict.resource_id;
        let from = conflict.from_revision;
        let local = self.with_store(move |s| s.revisions(id)).await?;

        // With nothing common the whole local history goes up and the whole
        // remote history goes away.
        let (after, tail): (Option<u32>, Vec<RevisionRecord>) =
            if self.conflict_has_common(id, from).await? {
                (
                    Some(from),
                    local.into_iter().filter(|r| r.revision > from).collect(),
                )
            } else {
                (None, local)
            };

        self.remote.overwrite_revisions(id, after, &tail).await?;
        if let (Some(first), Some(last)) = (tail.first(), tail.last()) {
            let (first, last) = (first.revision, last.revision);
            self.with_store(move |s| s.mark_synced(id, first, last))
                .await?;
        }
        Ok(())
    }

    async fn resolve_keep_remote(&self, conflict: ConflictRecord) -> SyncResult<()> {
        let id = conflict.resource_id;
        let from = conflict.from_revision;

        // With nothing common the local history is replaced wholesale.
        let (drop_from, after) = if self.conflict_has_common(id, from).await? {
            (from + 1, Some(from))
        } else {
            (0, None)
        };

        let records = self.remote.download_revisions(id, after).await?;
        self.with_store(move |s| {
            s.remove_revisions_from(id, drop_from)?;
            s.install_revisions(id, &records)
        })
        .await?;
        Ok(())
    }

    // ── Plumbing ─────────────────────────────────────────────────

    /// Runs a ledger operation off the async threads.
    async fn with_store<T, F>(&self, f: F) -> SyncResult<T>
    where
        F: FnOnce(&RevisionStore) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| SyncError::Store(StoreError::Storage(format!("ledger task failed: {e}"))))?
            .map_err(SyncError::from)
    }

    fn failed(e: &SyncError) -> ResourceOutcome {
        ResourceOutcome::Failed {
            status: e.status(),
            message: e.to_string(),
        }
    }
}
