//! Cursor service — ephemeral pointer positions.
//!
//! Cursor moves are presence, not exercise state: they are never gated by
//! control mode and never persisted. Rate-limited or stale writes are
//! dropped, and the sender is never told.
//!
//! The rate window is charged under the session lock, after the writer is
//! known to be active, so rejected writes never consume it.

use presence::{ControlError, CursorEntry, ParticipantId, SessionEvent, SessionId, WriteOutcome};
use tracing::debug;

use crate::frame::now_ms;
use crate::rate_limit::WriteKind;
use crate::services::session::SessionError;
use crate::state::AppState;

/// Apply a cursor write. Returns the event to fan out, or `None` if the
/// write was stale.
///
/// # Errors
///
/// Returns an error for out-of-range coordinates, an over-limit writer, or a
/// participant that is not active in the session.
pub async fn move_cursor(
    state: &AppState,
    session_id: SessionId,
    participant_id: ParticipantId,
    x: f64,
    y: f64,
    seq: u64,
) -> Result<Option<SessionEvent>, SessionError> {
    let cursor = CursorEntry::new(x, y, now_ms(), seq)?;

    let mut sessions = state.sessions.write().await;
    let live = sessions
        .get_mut(&session_id)
        .ok_or(SessionError::NotFound(session_id))?;
    if !live.record.is_active(participant_id) {
        return Err(ControlError::InactiveParticipant(participant_id).into());
    }
    state
        .rate_limiter
        .check_and_record(participant_id, WriteKind::Cursor)?;

    match live.record.write_cursor(participant_id, cursor) {
        WriteOutcome::Applied => Ok(Some(SessionEvent::CursorMoved { participant_id, cursor })),
        WriteOutcome::Stale => {
            debug!(%session_id, %participant_id, seq, "cursor: stale write dropped");
            Ok(None)
        }
    }
}

#[cfg(test)]
#[path = "cursor_test.rs"]
mod tests;
