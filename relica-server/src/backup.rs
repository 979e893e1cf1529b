//! Backup enumeration.
//!
//! Computes the delta of blob-bearing records changed strictly after a
//! checkpoint, for an out-of-process archival client. The read is
//! side-effect free: the same checkpoint always yields the same set, so a
//! client that crashed mid-batch can safely re-run (at-least-once).

use crate::error::ServerResult;
use crate::records::RecordStore;
use relica_types::{BackupDelta, BlobEntry, SyncCheckpoint};
use std::sync::Arc;
use tracing::debug;

/// Enumerates blob-bearing records for external archival.
pub struct BackupEnumerator {
    records: Arc<RecordStore>,
}

impl BackupEnumerator {
    /// Creates an enumerator over the given record store.
    pub fn new(records: Arc<RecordStore>) -> Self {
        Self { records }
    }

    /// Everything changed strictly after the checkpoint, across both
    /// resource kinds. Records without a blob key are skipped; a published
    /// resource's companion blob becomes its own entry under the
    /// companion id.
    pub fn enumerate_since(&self, checkpoint: SyncCheckpoint) -> ServerResult<BackupDelta> {
        let since = checkpoint.instant();
        let mut delta = BackupDelta::default();

        for record in self.records.published_since(since)? {
            if let Some(blob_key) = record.blob_key {
                delta.published.push(BlobEntry {
                    resource_id: record.resource_id,
                    revision: None,
                    created: record.created,
                    blob_key,
                });
            }
            if let (Some(companion_id), Some(blob_key)) =
                (record.companion_id, record.companion_blob_key)
            {
                delta.published.push(BlobEntry {
                    resource_id: companion_id,
                    revision: None,
                    created: record.created,
                    blob_key,
                });
            }
        }

        for record in self.records.user_revisions_since(since)? {
            if let Some(blob_key) = record.blob_key {
                delta.user_revisions.push(BlobEntry {
                    resource_id: record.resource_id,
                    revision: Some(record.revision),
                    created: record.created,
                    blob_key,
                });
            }
        }

        debug!(
            "backup delta since {since}: {} published, {} user revisions",
            delta.published.len(),
            delta.user_revisions.len()
        );
        Ok(delta)
    }
}
