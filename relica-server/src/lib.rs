//! Server-side components of Relica.
//!
//! The authoritative store splits structured metadata (record rows in the
//! [`RecordStore`]) from raw payload bytes (the [`BlobVault`]). Uploaded
//! blobs are attached to their records by the [`BlobBindery`], and the
//! [`BackupEnumerator`] feeds an external archival client with everything
//! changed since its last checkpoint.
//!
//! HTTP framing, sessions, and authentication live upstream; these
//! components take pre-validated inputs.

mod admin;
mod backup;
mod bindery;
mod error;
mod records;
mod vault;

pub use admin::BlobAdmin;
pub use backup::BackupEnumerator;
pub use bindery::BlobBindery;
pub use error::{ServerError, ServerResult};
pub use records::{Binding, PublishedRecord, RecordStore, UserRevisionRecord};
pub use vault::BlobVault;
