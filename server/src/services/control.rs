//! Control service — host-driven control-mode changes.
//!
//! DESIGN
//! ======
//! Requests carry the host's participant id. The claim is only accepted when
//! it equals the participant bound to the caller's connection; the rules in
//! `presence::control` then check that this participant is the host.

use presence::control::{grant_control, set_control_mode};
use presence::{ControlError, ControlMode, ControlState, ParticipantId, SessionId};
use tracing::{info, warn};

use crate::services::session::SessionError;
use crate::state::{AppState, LiveSession};

fn verify_claim(acting: ParticipantId, claimed: ParticipantId) -> Result<(), SessionError> {
    if acting == claimed {
        Ok(())
    } else {
        warn!(%acting, %claimed, "control: claimed host does not match connection");
        Err(ControlError::NotHost(claimed).into())
    }
}

fn record_change(live: &mut LiveSession, session_id: SessionId, before: ControlState, after: ControlState) {
    if before != after {
        live.mark_dirty();
        info!(
            %session_id,
            mode = %after.mode,
            controlled_by = ?after.controlled_by,
            "control: state changed"
        );
    }
}

/// Change the session's control mode.
///
/// # Errors
///
/// Returns `NotHost` if the claim does not match the connection or the
/// caller is not the host, and participant errors for an ineligible
/// `controlled_by`.
pub async fn set_mode(
    state: &AppState,
    session_id: SessionId,
    acting: ParticipantId,
    claimed_host: ParticipantId,
    mode: ControlMode,
    controlled_by: Option<ParticipantId>,
) -> Result<ControlState, SessionError> {
    verify_claim(acting, claimed_host)?;

    let mut sessions = state.sessions.write().await;
    let live = sessions
        .get_mut(&session_id)
        .ok_or(SessionError::NotFound(session_id))?;
    let before = live.record.control();
    let after = set_control_mode(&mut live.record, acting, mode, controlled_by)?;
    record_change(live, session_id, before, after);
    Ok(after)
}

/// Hand single-mode control to `target`.
///
/// # Errors
///
/// Returns `NotHost` as for [`set_mode`], `NotSingleMode` outside single
/// mode, and participant errors for an ineligible target.
pub async fn grant(
    state: &AppState,
    session_id: SessionId,
    acting: ParticipantId,
    claimed_host: ParticipantId,
    target: ParticipantId,
) -> Result<ControlState, SessionError> {
    verify_claim(acting, claimed_host)?;

    let mut sessions = state.sessions.write().await;
    let live = sessions
        .get_mut(&session_id)
        .ok_or(SessionError::NotFound(session_id))?;
    let before = live.record.control();
    let after = grant_control(&mut live.record, acting, target)?;
    record_change(live, session_id, before, after);
    Ok(after)
}

#[cfg(test)]
#[path = "control_test.rs"]
mod tests;
