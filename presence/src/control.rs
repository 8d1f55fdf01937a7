//! Control-mode arbitration.
//!
//! DESIGN
//! ======
//! These rules are the single source of truth for "who may act". The server
//! applies them at the mutation boundary (input and exercise writes are
//! rejected when `can_act` is false); clients apply the same rules to gate
//! their own UI before a write is ever sent.
//!
//! POLICY
//! ======
//! - `grant_control` outside `single` mode is rejected, not ignored.
//! - Control can only be handed to a present, active participant.
//! - When the controlling participant goes inactive, the session reverts to
//!   `free` (see [`release_participant`]).

use crate::model::{ControlMode, ControlState, GameSession, ParticipantId};

#[cfg(test)]
#[path = "control_test.rs"]
mod control_test;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControlError {
    #[error("participant {0} is not the session host")]
    NotHost(ParticipantId),
    #[error("control can only be granted in single mode (current mode: {0})")]
    NotSingleMode(ControlMode),
    #[error("participant {0} is not part of this session")]
    UnknownParticipant(ParticipantId),
    #[error("participant {0} is not active")]
    InactiveParticipant(ParticipantId),
    #[error("participant {0} may not act while control mode is {1}")]
    NotPermitted(ParticipantId, ControlMode),
}

/// Change the session's control mode on behalf of `acting`.
///
/// In `single` mode `controlled_by` defaults to the host. In the other modes
/// it is cleared. Calling this twice with the same arguments leaves the same
/// state as calling it once.
///
/// # Errors
///
/// Returns `NotHost` unless `acting` is the host, and `UnknownParticipant` /
/// `InactiveParticipant` if the requested controller cannot hold control.
pub fn set_control_mode(
    session: &mut GameSession,
    acting: ParticipantId,
    mode: ControlMode,
    controlled_by: Option<ParticipantId>,
) -> Result<ControlState, ControlError> {
    ensure_host(session, acting)?;

    let controlled_by = match mode {
        ControlMode::Single => {
            let target = controlled_by.unwrap_or(acting);
            ensure_eligible(session, target)?;
            Some(target)
        }
        ControlMode::Free | ControlMode::HostOnly => None,
    };

    let control = ControlState { mode, controlled_by };
    session.set_control(control);
    Ok(control)
}

/// Hand single-mode control to `target`.
///
/// # Errors
///
/// Returns `NotHost` unless `acting` is the host, `NotSingleMode` outside
/// single mode, and `UnknownParticipant` / `InactiveParticipant` for a target
/// that cannot hold control.
pub fn grant_control(
    session: &mut GameSession,
    acting: ParticipantId,
    target: ParticipantId,
) -> Result<ControlState, ControlError> {
    ensure_host(session, acting)?;
    if session.control_mode != ControlMode::Single {
        return Err(ControlError::NotSingleMode(session.control_mode));
    }
    ensure_eligible(session, target)?;

    session.controlled_by = Some(target);
    Ok(session.control())
}

/// Whether `participant_id` may mutate shared exercise state right now.
#[must_use]
pub fn can_act(session: &GameSession, participant_id: ParticipantId) -> bool {
    ensure_can_act(session, participant_id).is_ok()
}

/// Like [`can_act`], but says why not.
///
/// # Errors
///
/// Returns the reason the participant may not act.
pub fn ensure_can_act(session: &GameSession, participant_id: ParticipantId) -> Result<(), ControlError> {
    let Some(participant) = session.participant(participant_id) else {
        return Err(ControlError::UnknownParticipant(participant_id));
    };
    if !participant.is_active {
        return Err(ControlError::InactiveParticipant(participant_id));
    }

    let allowed = match session.control_mode {
        ControlMode::Free => true,
        ControlMode::Single => session.controlled_by == Some(participant_id),
        ControlMode::HostOnly => participant.is_host,
    };
    if allowed {
        Ok(())
    } else {
        Err(ControlError::NotPermitted(participant_id, session.control_mode))
    }
}

/// Revert to `free` if `participant_id` held single-mode control.
///
/// Called after a participant goes inactive. Returns the new control state
/// when a fallback happened.
pub fn release_participant(session: &mut GameSession, participant_id: ParticipantId) -> Option<ControlState> {
    if session.control_mode != ControlMode::Single || session.controlled_by != Some(participant_id) {
        return None;
    }
    let control = ControlState { mode: ControlMode::Free, controlled_by: None };
    session.set_control(control);
    Some(control)
}

fn ensure_host(session: &GameSession, acting: ParticipantId) -> Result<(), ControlError> {
    if session.is_host(acting) {
        Ok(())
    } else {
        Err(ControlError::NotHost(acting))
    }
}

fn ensure_eligible(session: &GameSession, target: ParticipantId) -> Result<(), ControlError> {
    match session.participant(target) {
        None => Err(ControlError::UnknownParticipant(target)),
        Some(p) if !p.is_active => Err(ControlError::InactiveParticipant(target)),
        Some(_) => Ok(()),
    }
}
