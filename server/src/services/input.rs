//! Input service — in-progress answers per participant.
//!
//! Every change is written immediately (no throttle on the client side), so
//! the server rate-limits instead. An input write mutates exercise state and
//! is therefore gated by control mode.
//!
//! Order: field validation, session lookup, permission, then the rate
//! window. Only a write that would be applied is charged against the limit.

use presence::control::ensure_can_act;
use presence::{InputEntry, ParticipantId, SessionEvent, SessionId, WriteOutcome};
use tracing::{debug, warn};

use crate::frame::now_ms;
use crate::rate_limit::WriteKind;
use crate::services::session::SessionError;
use crate::state::AppState;

/// Apply an input write. Returns the event to fan out, or `None` if the
/// write was stale.
///
/// # Errors
///
/// Returns an error for an over-long value or an item past the end of the
/// exercise, a participant that may not act under the current control mode,
/// or an over-limit writer.
pub async fn update_input(
    state: &AppState,
    session_id: SessionId,
    participant_id: ParticipantId,
    value: String,
    item_index: u32,
    seq: u64,
) -> Result<Option<SessionEvent>, SessionError> {
    let input = InputEntry::new(value, item_index, now_ms(), seq)?;

    let mut sessions = state.sessions.write().await;
    let live = sessions
        .get_mut(&session_id)
        .ok_or(SessionError::NotFound(session_id))?;
    if let Err(e) = ensure_can_act(&live.record, participant_id) {
        warn!(%session_id, %participant_id, mode = %live.record.control_mode, "input: write rejected");
        return Err(e.into());
    }
    live.record.check_item(item_index)?;
    state
        .rate_limiter
        .check_and_record(participant_id, WriteKind::Input)?;

    match live.record.write_input(participant_id, input.clone()) {
        WriteOutcome::Applied => Ok(Some(SessionEvent::InputChanged { participant_id, input })),
        WriteOutcome::Stale => {
            debug!(%session_id, %participant_id, seq, "input: stale write dropped");
            Ok(None)
        }
    }
}

#[cfg(test)]
#[path = "input_test.rs"]
mod tests;
