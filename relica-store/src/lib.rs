//! SQLite revision ledger for Relica clients.
//!
//! Tracks every locally-created resource and its revision history in a
//! single-writer SQLite database. The ledger is the client-side source of
//! truth the sync coordinator compares against the remote store.
//!
//! # Architecture
//!
//! - One `resource` row per tracked resource, tagged with a coarse slot
//! - One `resource_revision` row per (resource, revision) pair
//! - Removed resources are remembered until the deletion has synced

mod error;
mod revision_store;

pub use error::{StoreError, StoreResult};
pub use revision_store::RevisionStore;
