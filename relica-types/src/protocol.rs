//! Protocol entities shared between the server components and their
//! out-of-process consumers (the backup archival client, the upload
//! endpoint glue). HTTP framing and authentication are handled elsewhere;
//! these are the payloads.

use crate::{BlobKey, ResourceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome status carried on every server response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseStatus {
    /// The request was handled.
    Success,
    /// The server failed internally (bad input, database error). Retrying
    /// the identical request will not help.
    FailedServerError,
    /// The server could not be reached. The caller may retry.
    FailedServerConnection,
}

impl ResponseStatus {
    /// True for [`ResponseStatus::Success`].
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// One blob-bearing record, as reported to the backup archival client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobEntry {
    /// The resource (or companion id) the blob belongs to.
    pub resource_id: ResourceId,
    /// Revision number for user-resource blobs; `None` for published blobs.
    pub revision: Option<u32>,
    /// When the record was created/uploaded server-side.
    pub created: DateTime<Utc>,
    /// Storage token to fetch the bytes with.
    pub blob_key: BlobKey,
}

/// Response of the backup enumeration: everything changed since the caller's
/// checkpoint, split by resource kind.
///
/// The archival client is expected to fetch and persist every entry, then
/// advance its checkpoint only after the whole batch succeeded. Re-running
/// with the same checkpoint returns the same set (at-least-once semantics).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupDelta {
    /// Published-resource blobs (primary and companion entries).
    pub published: Vec<BlobEntry>,
    /// User-resource revision blobs, ordered by upload time then revision.
    pub user_revisions: Vec<BlobEntry>,
}

impl BackupDelta {
    /// True when there is nothing to archive.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.published.is_empty() && self.user_revisions.is_empty()
    }
}

/// Report of one blob-binding batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindReport {
    /// Bindings persisted in the commit.
    pub bound: usize,
    /// Orphan blobs deleted from storage (best-effort).
    pub orphans_deleted: usize,
    /// Overall status. Parse failures abort the batch with
    /// [`ResponseStatus::FailedServerError`].
    pub status: ResponseStatus,
    /// Describes which field name failed to parse, when one did.
    pub error_message: Option<String>,
}

impl BindReport {
    /// A failed report carrying a parse error message.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            bound: 0,
            orphans_deleted: 0,
            status: ResponseStatus::FailedServerError,
            error_message: Some(message.into()),
        }
    }
}

/// Report of the administrative blob purge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeReport {
    /// Blobs deleted.
    pub deleted: usize,
    /// Whether the purge was authorized and completed.
    pub status: ResponseStatus,
}
