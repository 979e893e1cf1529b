//! Revision history value types.
//!
//! A resource's history is a monotonically increasing sequence of numbered
//! revisions. Revisions created locally may not carry a timestamp yet; the
//! server stamps them on upload.

use crate::ResourceId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coarse resource category used for existence tracking in the local ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceSlot {
    /// A playable level definition.
    Level,
    /// An enemy definition.
    Enemy,
    /// A bullet definition.
    Bullet,
    /// A player ship definition.
    Ship,
}

impl ResourceSlot {
    /// Stable integer mapping for SQL storage.
    #[must_use]
    pub const fn to_id(self) -> i64 {
        match self {
            Self::Level => 1,
            Self::Enemy => 2,
            Self::Bullet => 3,
            Self::Ship => 4,
        }
    }

    /// Reverse of [`ResourceSlot::to_id`]. Returns `None` for unknown ids.
    #[must_use]
    pub const fn from_id(id: i64) -> Option<Self> {
        match id {
            1 => Some(Self::Level),
            2 => Some(Self::Enemy),
            3 => Some(Self::Bullet),
            4 => Some(Self::Ship),
            _ => None,
        }
    }
}

/// One versioned snapshot of a resource's content.
///
/// Invariant: for a given resource, revision numbers are unique and form a
/// monotonically increasing (possibly sparse) sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionRecord {
    /// The resource this revision belongs to.
    pub resource_id: ResourceId,
    /// Revision number, starting at 0.
    pub revision: u32,
    /// Server-stamped creation time. `None` until the revision has been
    /// uploaded and timestamped.
    pub created_at: Option<DateTime<Utc>>,
}

impl RevisionRecord {
    /// Creates a revision record.
    #[must_use]
    pub fn new(resource_id: ResourceId, revision: u32, created_at: Option<DateTime<Utc>>) -> Self {
        Self {
            resource_id,
            revision,
            created_at,
        }
    }
}

/// A timestamp marking "everything at or before this instant has been
/// durably backed up or synchronized".
///
/// Checkpoints only move forward through [`SyncCheckpoint::advance_to`];
/// rewinding requires the explicit [`SyncCheckpoint::rewind_to`] operator
/// action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncCheckpoint(DateTime<Utc>);

impl SyncCheckpoint {
    /// The epoch checkpoint — nothing has been processed yet.
    #[must_use]
    pub fn epoch() -> Self {
        Self(DateTime::<Utc>::UNIX_EPOCH)
    }

    /// Creates a checkpoint at the given instant.
    #[must_use]
    pub const fn at(instant: DateTime<Utc>) -> Self {
        Self(instant)
    }

    /// Returns the checkpoint instant.
    #[must_use]
    pub const fn instant(&self) -> DateTime<Utc> {
        self.0
    }

    /// Advances the checkpoint. A regression is ignored; the checkpoint
    /// never moves backwards through this method.
    pub fn advance_to(&mut self, instant: DateTime<Utc>) {
        if instant > self.0 {
            self.0 = instant;
        }
    }

    /// Explicit operator action: moves the checkpoint to an arbitrary
    /// instant, including backwards (e.g. to re-archive after data loss).
    pub fn rewind_to(&mut self, instant: DateTime<Utc>) {
        self.0 = instant;
    }
}

/// A detected divergence between a resource's local and remote histories.
///
/// `from_revision` is the last revision both sides agree on; everything
/// after it disagrees. Created during comparison, consumed by an explicit
/// resolution, then discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    /// The diverged resource.
    pub resource_id: ResourceId,
    /// Last common revision number. 0 when the histories share no revision.
    pub from_revision: u32,
}

/// How to resolve a [`ConflictRecord`].
///
/// A tagged choice rather than a boolean so the contract stays
/// self-documenting and extensible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolveStrategy {
    /// Local revisions become authoritative; remote history is overwritten
    /// from the conflict point onward.
    KeepLocal,
    /// Remote revisions become authoritative; local history is discarded
    /// from the conflict point onward and replaced by downloads.
    KeepRemote,
}
