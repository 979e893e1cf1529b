//! Remote store abstraction.
//!
//! The coordinator talks to the server exclusively through [`RemoteStore`];
//! transport, authentication, and retries live behind the trait. Tests
//! substitute an in-memory implementation.

use crate::error::SyncResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relica_types::{ResourceId, RevisionRecord};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Compact per-resource view of the remote history, used as a fast path
/// before fetching full revision lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSummary {
    /// Highest revision number the server holds, `None` when it has none.
    pub latest_revision: Option<u32>,
    /// Number of revisions the server holds.
    pub revision_count: usize,
}

/// Server-side revision storage, as seen by the sync coordinator.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Summaries for the given resources. Resources the server has never
    /// seen may be absent from the map.
    async fn fetch_summary(
        &self,
        ids: &[ResourceId],
    ) -> SyncResult<HashMap<ResourceId, RemoteSummary>>;

    /// Full revision list of one resource, ascending by revision number.
    async fn fetch_revisions(&self, id: ResourceId) -> SyncResult<Vec<RevisionRecord>>;

    /// Revisions strictly after `after` (everything when `None`), ascending.
    async fn download_revisions(
        &self,
        id: ResourceId,
        after: Option<u32>,
    ) -> SyncResult<Vec<RevisionRecord>>;

    /// Appends revisions to the remote history.
    async fn upload_revisions(&self, id: ResourceId, records: &[RevisionRecord]) -> SyncResult<()>;

    /// Replaces the remote history strictly after `after` with the given
    /// records; `None` replaces the whole history. Keep-local conflict
    /// resolution; irreversible.
    async fn overwrite_revisions(
        &self,
        id: ResourceId,
        after: Option<u32>,
        records: &[RevisionRecord],
    ) -> SyncResult<()>;

    /// Records a deletion tombstone on the server.
    async fn push_deleted(&self, id: ResourceId) -> SyncResult<()>;

    /// Resources the server deleted strictly after the given instant.
    async fn deleted_since(&self, since: DateTime<Utc>) -> SyncResult<Vec<ResourceId>>;
}
