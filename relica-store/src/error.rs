//! Error types for the ledger.

use relica_types::ResourceId;
use thiserror::Error;

/// Result type for ledger operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in ledger operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Resource not found.
    #[error("resource not found: {0}")]
    NotFound(ResourceId),

    /// Storage-level failure (lock poisoning and the like).
    #[error("storage error: {0}")]
    Storage(String),
}
