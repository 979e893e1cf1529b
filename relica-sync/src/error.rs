//! Synchronization error types.

use relica_store::StoreError;
use relica_types::{ResourceId, ResponseStatus};
use thiserror::Error;

/// Errors produced by the sync coordinator.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The server could not be reached. Transient; the caller may retry the
    /// whole session.
    #[error("server unreachable: {0}")]
    Connection(String),

    /// The server rejected or failed the request. Retrying the identical
    /// request will not help.
    #[error("server error: {0}")]
    Remote(String),

    /// The local revision ledger failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The session was cancelled before this resource was scheduled.
    #[error("synchronization cancelled")]
    Cancelled,

    /// A resolution was requested for a resource with no pending conflict.
    #[error("no pending conflict for resource {0}")]
    UnknownConflict(ResourceId),
}

impl SyncError {
    /// Protocol status this error maps to on the wire.
    #[must_use]
    pub const fn status(&self) -> ResponseStatus {
        match self {
            Self::Connection(_) => ResponseStatus::FailedServerConnection,
            _ => ResponseStatus::FailedServerError,
        }
    }
}

/// Result alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;
