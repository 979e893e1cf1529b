//! Per-resource session state.
//!
//! Tracks which phase each resource is in during a sync session and holds
//! pending conflicts until an explicit resolution consumes them. The
//! session is idle only when no resource remains in a transfer or
//! conflicted phase.

use relica_types::{ConflictRecord, ResourceId};
use std::collections::HashMap;

/// Phase a single resource moves through during synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPhase {
    /// Not part of an active session.
    #[default]
    Idle,
    /// Local and remote histories are being compared.
    Comparing,
    /// Local revisions are being uploaded.
    Uploading,
    /// Remote revisions are being downloaded.
    Downloading,
    /// Histories diverged; blocked until resolved.
    Conflicted,
}

/// Phase and conflict bookkeeping for one sync session.
#[derive(Debug, Default)]
pub struct SessionState {
    phases: HashMap<ResourceId, SyncPhase>,
    conflicts: HashMap<ResourceId, ConflictRecord>,
}

impl SessionState {
    /// Current phase of a resource. Untracked resources are idle.
    #[must_use]
    pub fn phase_of(&self, id: ResourceId) -> SyncPhase {
        self.phases.get(&id).copied().unwrap_or_default()
    }

    /// Moves a resource into a phase. Idle resources are dropped from the
    /// map entirely.
    pub fn set_phase(&mut self, id: ResourceId, phase: SyncPhase) {
        if phase == SyncPhase::Idle {
            self.phases.remove(&id);
        } else {
            self.phases.insert(id, phase);
        }
    }

    /// Records a detected conflict and blocks the resource.
    pub fn record_conflict(&mut self, conflict: ConflictRecord) {
        self.phases
            .insert(conflict.resource_id, SyncPhase::Conflicted);
        self.conflicts.insert(conflict.resource_id, conflict);
    }

    /// Consumes the pending conflict for a resource, if any. The resource
    /// stays in the conflicted phase until resolution completes.
    pub fn take_conflict(&mut self, id: ResourceId) -> Option<ConflictRecord> {
        self.conflicts.remove(&id)
    }

    /// All pending conflicts.
    #[must_use]
    pub fn conflicts(&self) -> Vec<ConflictRecord> {
        let mut conflicts: Vec<ConflictRecord> = self.conflicts.values().copied().collect();
        conflicts.sort_by_key(|c| c.resource_id);
        conflicts
    }

    /// True when no resource is transferring or conflicted.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.phases.is_empty()
    }
}
