use super::*;
use uuid::Uuid;

struct Trio {
    session: GameSession,
    a: ParticipantId,
    b: ParticipantId,
    c: ParticipantId,
}

/// A (host), B, C joined in that order.
fn trio() -> Trio {
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    let c = Uuid::new_v4();
    let mut session = GameSession::new(Uuid::new_v4(), a, "A", ControlMode::Free, 10, 0);
    session.join(b, "B", 1);
    session.join(c, "C", 2);
    Trio { session, a, b, c }
}

// =============================================================================
// set_control_mode
// =============================================================================

#[test]
fn set_control_mode_requires_host() {
    let mut t = trio();
    let err = set_control_mode(&mut t.session, t.b, ControlMode::HostOnly, None).unwrap_err();
    assert_eq!(err, ControlError::NotHost(t.b));
    assert_eq!(t.session.control_mode, ControlMode::Free);
}

#[test]
fn set_control_mode_is_idempotent() {
    let mut t = trio();
    let first = set_control_mode(&mut t.session, t.a, ControlMode::Single, Some(t.b)).unwrap();
    let after_once = t.session.clone();
    let second = set_control_mode(&mut t.session, t.a, ControlMode::Single, Some(t.b)).unwrap();

    assert_eq!(first, second);
    assert_eq!(t.session, after_once);
}

#[test]
fn set_single_defaults_controller_to_host() {
    let mut t = trio();
    let control = set_control_mode(&mut t.session, t.a, ControlMode::Single, None).unwrap();
    assert_eq!(control.controlled_by, Some(t.a));
}

#[test]
fn leaving_single_clears_controller() {
    let mut t = trio();
    set_control_mode(&mut t.session, t.a, ControlMode::Single, Some(t.c)).unwrap();
    let control = set_control_mode(&mut t.session, t.a, ControlMode::HostOnly, Some(t.c)).unwrap();
    assert_eq!(control, ControlState { mode: ControlMode::HostOnly, controlled_by: None });
    assert!(t.session.controlled_by.is_none());
}

#[test]
fn every_transition_is_reachable() {
    let modes = [ControlMode::Free, ControlMode::Single, ControlMode::HostOnly];
    for from in modes {
        for to in modes {
            let mut t = trio();
            set_control_mode(&mut t.session, t.a, from, None).unwrap();
            let control = set_control_mode(&mut t.session, t.a, to, None).unwrap();
            assert_eq!(control.mode, to, "{from} -> {to}");
        }
    }
}

#[test]
fn set_single_rejects_unknown_or_inactive_controller() {
    let mut t = trio();
    let stranger = Uuid::new_v4();
    assert_eq!(
        set_control_mode(&mut t.session, t.a, ControlMode::Single, Some(stranger)),
        Err(ControlError::UnknownParticipant(stranger))
    );

    t.session.deactivate(t.c);
    assert_eq!(
        set_control_mode(&mut t.session, t.a, ControlMode::Single, Some(t.c)),
        Err(ControlError::InactiveParticipant(t.c))
    );
    assert_eq!(t.session.control_mode, ControlMode::Free);
}

// =============================================================================
// grant_control
// =============================================================================

#[test]
fn last_grant_wins() {
    let mut t = trio();
    set_control_mode(&mut t.session, t.a, ControlMode::Single, None).unwrap();
    grant_control(&mut t.session, t.a, t.b).unwrap();
    grant_control(&mut t.session, t.a, t.c).unwrap();
    assert_eq!(t.session.controlled_by, Some(t.c));
}

#[test]
fn grant_outside_single_is_rejected() {
    for mode in [ControlMode::Free, ControlMode::HostOnly] {
        let mut t = trio();
        set_control_mode(&mut t.session, t.a, mode, None).unwrap();
        let before = t.session.clone();
        assert_eq!(grant_control(&mut t.session, t.a, t.b), Err(ControlError::NotSingleMode(mode)));
        assert_eq!(t.session, before);
    }
}

#[test]
fn grant_requires_host() {
    let mut t = trio();
    set_control_mode(&mut t.session, t.a, ControlMode::Single, Some(t.b)).unwrap();
    assert_eq!(grant_control(&mut t.session, t.b, t.c), Err(ControlError::NotHost(t.b)));
    assert_eq!(t.session.controlled_by, Some(t.b));
}

// =============================================================================
// can_act
// =============================================================================

#[test]
fn free_mode_lets_every_active_participant_act() {
    let mut t = trio();
    assert!(can_act(&t.session, t.a));
    assert!(can_act(&t.session, t.b));
    t.session.deactivate(t.c);
    assert!(!can_act(&t.session, t.c));
    assert!(!can_act(&t.session, Uuid::new_v4()));
}

#[test]
fn single_mode_lets_only_controller_act() {
    let mut t = trio();
    set_control_mode(&mut t.session, t.a, ControlMode::Single, None).unwrap();
    grant_control(&mut t.session, t.a, t.b).unwrap();

    assert!(!can_act(&t.session, t.a));
    assert!(can_act(&t.session, t.b));
    assert_eq!(
        ensure_can_act(&t.session, t.c),
        Err(ControlError::NotPermitted(t.c, ControlMode::Single))
    );
}

#[test]
fn host_only_mode_lets_only_host_act() {
    let mut t = trio();
    set_control_mode(&mut t.session, t.a, ControlMode::HostOnly, None).unwrap();
    assert!(can_act(&t.session, t.a));
    assert!(!can_act(&t.session, t.b));
    assert!(!can_act(&t.session, t.c));
}

// =============================================================================
// release_participant
// =============================================================================

#[test]
fn controller_leaving_reverts_to_free() {
    let mut t = trio();
    set_control_mode(&mut t.session, t.a, ControlMode::Single, Some(t.b)).unwrap();
    t.session.deactivate(t.b);

    let control = release_participant(&mut t.session, t.b);
    assert_eq!(control, Some(ControlState { mode: ControlMode::Free, controlled_by: None }));
    assert!(can_act(&t.session, t.c));
}

#[test]
fn other_participant_leaving_keeps_control() {
    let mut t = trio();
    set_control_mode(&mut t.session, t.a, ControlMode::Single, Some(t.b)).unwrap();
    t.session.deactivate(t.c);

    assert_eq!(release_participant(&mut t.session, t.c), None);
    assert_eq!(t.session.controlled_by, Some(t.b));
}
