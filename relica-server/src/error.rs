//! Error types for the server components.

use relica_types::{BlobKey, TokenParseError};
use thiserror::Error;

/// Result type for server-side operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in server-side operations.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// An upload field name didn't match the wire contract.
    #[error("malformed upload token: {0}")]
    Token(#[from] TokenParseError),

    /// No blob stored under the given key.
    #[error("blob not found: {0}")]
    BlobNotFound(BlobKey),

    /// Storage-level failure (lock poisoning and the like).
    #[error("storage error: {0}")]
    Storage(String),
}
