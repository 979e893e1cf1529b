use relica_sync::{SessionState, SyncPhase};
use relica_types::{ConflictRecord, ResourceId};

#[test]
fn untracked_resources_are_idle() {
    let state = SessionState::default();
    assert_eq!(state.phase_of(ResourceId::new()), SyncPhase::Idle);
    assert!(state.is_idle());
}

#[test]
fn phases_track_per_resource() {
    let mut state = SessionState::default();
    let a = ResourceId::new();
    let b = ResourceId::new();

    state.set_phase(a, SyncPhase::Uploading);
    state.set_phase(b, SyncPhase::Downloading);
    assert_eq!(state.phase_of(a), SyncPhase::Uploading);
    assert_eq!(state.phase_of(b), SyncPhase::Downloading);
    assert!(!state.is_idle());

    state.set_phase(a, SyncPhase::Idle);
    assert!(!state.is_idle());
    state.set_phase(b, SyncPhase::Idle);
    assert!(state.is_idle());
}

#[test]
fn recording_a_conflict_blocks_the_resource() {
    let mut state = SessionState::default();
    let id = ResourceId::new();
    let conflict = ConflictRecord {
        resource_id: id,
        from_revision: 3,
    };

    state.record_conflict(conflict);
    assert_eq!(state.phase_of(id), SyncPhase::Conflicted);
    assert_eq!(state.conflicts(), vec![conflict]);
    assert!(!state.is_idle());
}

#[test]
fn taking_a_conflict_leaves_the_phase_blocked() {
    let mut state = SessionState::default();
    let id = ResourceId::new();
    state.record_conflict(ConflictRecord {
        resource_id: id,
        from_revision: 0,
    });

    assert!(state.take_conflict(id).is_some());
    assert!(state.take_conflict(id).is_none());
    // Resolution clears the phase explicitly once the transfer lands.
    assert_eq!(state.phase_of(id), SyncPhase::Conflicted);
    assert!(!state.is_idle());

    state.set_phase(id, SyncPhase::Idle);
    assert!(state.is_idle());
}
