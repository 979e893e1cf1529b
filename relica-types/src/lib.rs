//! Core type definitions for Relica.
//!
//! Relica tracks game resources (levels, enemies, bullets, ships) and their
//! revision histories, and keeps the binary payloads ("blobs") synchronized
//! between a client-side ledger and a remote authoritative store. This crate
//! holds the identifier types, the revision/conflict value types, the upload
//! token wire format, and the protocol entities shared by the client and
//! server crates. It performs no I/O.

mod ids;
mod protocol;
mod revision;
mod token;

pub use ids::{BlobKey, ResourceId};
pub use protocol::{BackupDelta, BindReport, BlobEntry, PurgeReport, ResponseStatus};
pub use revision::{
    ConflictRecord, ResolveStrategy, ResourceSlot, RevisionRecord, SyncCheckpoint,
};
pub use token::{TokenParseError, UploadToken};
