//! Client-side revision synchronization.
//!
//! The [`SyncCoordinator`] compares the local revision ledger against a
//! [`RemoteStore`] and transfers whichever side is behind. Divergent
//! histories become [`ConflictRecord`]s that block the resource until the
//! caller resolves them with a [`ResolveStrategy`].
//!
//! [`ConflictRecord`]: relica_types::ConflictRecord
//! [`ResolveStrategy`]: relica_types::ResolveStrategy

mod coordinator;
mod error;
mod remote;
mod state;

pub use coordinator::{
    CancelFlag, DeletionSummary, ResourceOutcome, SyncConfig, SyncCoordinator, SyncReport,
};
pub use error::{SyncError, SyncResult};
pub use remote::{RemoteStore, RemoteSummary};
pub use state::{SessionState, SyncPhase};
