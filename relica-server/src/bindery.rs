//! Blob bindery — attaches freshly uploaded blobs to their records.
//!
//! Uploads arrive as a map from wire field name to storage token. Field
//! names are parsed into typed [`UploadToken`]s up front; a single
//! malformed name aborts the whole batch before anything is written.
//! Matched bindings commit in one transaction. Tokens with no matching
//! record are orphans: their blobs are deleted from the vault best-effort,
//! after the commit, so storage never leaks for unreferenced payloads.

use crate::error::ServerResult;
use crate::records::{Binding, RecordStore};
use crate::vault::BlobVault;
use chrono::{DateTime, Utc};
use relica_types::{BindReport, BlobKey, ResourceId, ResponseStatus, UploadToken};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Binds uploaded blobs to published or user-revision records.
pub struct BlobBindery {
    records: Arc<RecordStore>,
    vault: Arc<BlobVault>,
}

/// Typed container for one upload batch, split by token kind.
#[derive(Default)]
struct UploadBatch {
    published: HashMap<ResourceId, BlobKey>,
    revisions: HashMap<ResourceId, BTreeMap<u32, BlobKey>>,
}

impl UploadBatch {
    fn parse(uploads: &HashMap<String, BlobKey>) -> Result<Self, relica_types::TokenParseError> {
        let mut batch = Self::default();
        for (field, key) in uploads {
            match UploadToken::parse(field)? {
                UploadToken::Published(id) => {
                    batch.published.insert(id, key.clone());
                }
                UploadToken::Revision(id, revision) => {
                    batch
                        .revisions
                        .entry(id)
                        .or_default()
                        .insert(revision, key.clone());
                }
            }
        }
        Ok(batch)
    }

    fn revision_count(&self) -> usize {
        self.revisions.values().map(BTreeMap::len).sum()
    }
}

impl BlobBindery {
    /// Creates a bindery over the given record store and vault.
    pub fn new(records: Arc<RecordStore>, vault: Arc<BlobVault>) -> Self {
        Self { records, vault }
    }

    /// Binds a batch of uploads.
    ///
    /// Never partially commits on a parse failure; database errors likewise
    /// surface as a failed report with nothing bound.
    pub fn bind_uploads(&self, uploads: &HashMap<String, BlobKey>) -> BindReport {
        let batch = match UploadBatch::parse(uploads) {
            Ok(batch) => batch,
            Err(e) => {
                warn!("aborting binding batch: {e}");
                return BindReport::failed(e.to_string());
            }
        };

        info!(
            "binding {} published and {} user-revision uploads",
            batch.published.len(),
            batch.revision_count()
        );

        match self.bind_batch(batch) {
            Ok(report) => report,
            Err(e) => {
                warn!("binding batch failed: {e}");
                BindReport::failed(e.to_string())
            }
        }
    }

    fn bind_batch(&self, batch: UploadBatch) -> ServerResult<BindReport> {
        let mut bindings = Vec::new();
        let mut orphans: Vec<BlobKey> = Vec::new();

        // User resources: match uploaded revisions against existing rows.
        for (resource_id, mut pending) in batch.revisions {
            for row in self.records.user_revisions(resource_id)? {
                if let Some(blob_key) = pending.remove(&row.revision) {
                    bindings.push(Binding::Revision {
                        resource_id,
                        revision: row.revision,
                        blob_key,
                    });
                }
            }
            if !pending.is_empty() {
                debug!(
                    "{} uploaded revisions of {resource_id} matched no record",
                    pending.len()
                );
                orphans.extend(pending.into_values());
            }
        }

        // Published resources: primary id first, companion id second.
        for (resource_id, blob_key) in batch.published {
            if self.records.get_published(resource_id)?.is_some() {
                bindings.push(Binding::Published {
                    resource_id,
                    blob_key,
                });
            } else if let Some(record) = self.records.find_by_companion(resource_id)? {
                bindings.push(Binding::Companion {
                    resource_id: record.resource_id,
                    blob_key,
                });
            } else {
                warn!("no published record for uploaded resource {resource_id}");
                orphans.push(blob_key);
            }
        }

        let bound = self.records.apply_bindings(&bindings)?;

        // Orphan cleanup happens outside the commit and must never fail the
        // request; a missed deletion is picked up by the next sweep.
        let mut orphans_deleted = 0;
        for key in &orphans {
            match self.vault.delete(key) {
                Ok(()) => orphans_deleted += 1,
                Err(e) => warn!("failed to delete orphan blob {key}: {e}"),
            }
        }

        info!("bound {bound} blobs, deleted {orphans_deleted} orphans");
        Ok(BindReport {
            bound,
            orphans_deleted,
            status: ResponseStatus::Success,
            error_message: None,
        })
    }

    /// Deletes a user resource: drops its revision rows, records the
    /// deletion tombstone, and removes the revisions' blobs from the vault.
    /// Blob removal is best-effort; a missed deletion is picked up by the
    /// next sweep. Returns how many blobs were deleted.
    pub fn delete_user_resource(&self, id: ResourceId, at: DateTime<Utc>) -> ServerResult<usize> {
        let keys = self.records.delete_user_resource(id, at)?;
        let mut deleted = 0;
        for key in &keys {
            match self.vault.delete(key) {
                Ok(()) => deleted += 1,
                Err(e) => warn!("failed to delete blob {key} of deleted resource {id}: {e}"),
            }
        }
        info!("deleted resource {id}: {deleted} blobs removed");
        Ok(deleted)
    }

    /// Deletes every vault blob referenced by no record row. The retry path
    /// for orphan deletions that failed during binding.
    pub fn sweep_orphans(&self) -> ServerResult<usize> {
        let referenced = self.records.referenced_blob_keys()?;
        let mut swept = 0;
        for key in self.vault.keys()? {
            if !referenced.contains(&key) {
                match self.vault.delete(&key) {
                    Ok(()) => swept += 1,
                    Err(e) => warn!("orphan sweep failed to delete {key}: {e}"),
                }
            }
        }
        if swept > 0 {
            info!("orphan sweep deleted {swept} blobs");
        }
        Ok(swept)
    }
}
