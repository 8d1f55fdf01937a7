//! Exercise service — moves the group between exercise items.

use presence::control::ensure_can_act;
use presence::{ParticipantId, SessionEvent, SessionId};
use tracing::info;

use crate::services::session::SessionError;
use crate::state::AppState;

/// Set the session's current item. Returns `None` if it already was there.
///
/// # Errors
///
/// Returns `NotFound` for unknown sessions, a control error when the
/// participant may not act under the current mode, and a validation error
/// for an index at or past `total_items`.
pub async fn set_item(
    state: &AppState,
    session_id: SessionId,
    participant_id: ParticipantId,
    item_index: u32,
) -> Result<Option<SessionEvent>, SessionError> {
    let mut sessions = state.sessions.write().await;
    let live = sessions
        .get_mut(&session_id)
        .ok_or(SessionError::NotFound(session_id))?;
    ensure_can_act(&live.record, participant_id)?;
    live.record.check_item(item_index)?;

    if live.record.current_item_index == item_index {
        return Ok(None);
    }
    live.record.current_item_index = item_index;
    live.mark_dirty();
    info!(%session_id, %participant_id, item_index, "exercise: item changed");
    Ok(Some(SessionEvent::ItemChanged { item_index }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_helpers;
    use presence::{ControlError, ControlMode, ValidationError};

    #[tokio::test]
    async fn controller_moves_item_and_marks_dirty() {
        let state = test_helpers::test_app_state();
        let (session_id, host) = test_helpers::seed_session(&state, ControlMode::HostOnly).await;
        let version_before = state.sessions.read().await[&session_id].version;

        let event = set_item(&state, session_id, host, 3).await.unwrap();

        assert_eq!(event, Some(SessionEvent::ItemChanged { item_index: 3 }));
        let sessions = state.sessions.read().await;
        assert_eq!(sessions[&session_id].record.current_item_index, 3);
        assert!(sessions[&session_id].version > version_before);
    }

    #[tokio::test]
    async fn same_item_is_a_no_op() {
        let state = test_helpers::test_app_state();
        let (session_id, host) = test_helpers::seed_session(&state, ControlMode::Free).await;
        assert_eq!(set_item(&state, session_id, host, 0).await.unwrap(), None);
    }

    #[tokio::test]
    async fn non_controller_is_rejected() {
        let state = test_helpers::test_app_state();
        let (session_id, _host) = test_helpers::seed_session(&state, ControlMode::HostOnly).await;
        let bo = test_helpers::seed_participant(&state, session_id, "Bo").await;

        let err = set_item(&state, session_id, bo, 1).await.unwrap_err();
        assert!(matches!(err, SessionError::Control(ControlError::NotPermitted(..))));
        assert_eq!(state.sessions.read().await[&session_id].record.current_item_index, 0);
    }

    #[tokio::test]
    async fn item_past_the_last_is_rejected() {
        let state = test_helpers::test_app_state();
        let (session_id, host) = test_helpers::seed_session(&state, ControlMode::Free).await;
        let version_before = state.sessions.read().await[&session_id].version;

        set_item(&state, session_id, host, 9).await.unwrap();
        let err = set_item(&state, session_id, host, 10).await.unwrap_err();

        assert!(matches!(
            err,
            SessionError::Validation(ValidationError::ItemOutOfRange { index: 10, total: 10 })
        ));
        let sessions = state.sessions.read().await;
        assert_eq!(sessions[&session_id].record.current_item_index, 9);
        assert_eq!(sessions[&session_id].version, version_before + 1);
    }
}
