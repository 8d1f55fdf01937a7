//! Client-local projection of one joined session.
//!
//! SYSTEM CONTEXT
//! ==============
//! A client applies every `SessionEvent` pushed by the server to its mirror
//! and re-renders from it. Writes go through the same sequence check as on
//! the server, so a reordered stale cursor cannot flicker the view.

use crate::color::participant_color;
use crate::control;
use crate::event::SessionEvent;
use crate::filter::{self, RemoteCursor, RemoteInput};
use crate::model::{GameSession, ParticipantId, WriteOutcome};

#[cfg(test)]
#[path = "mirror_test.rs"]
mod mirror_test;

#[derive(Debug, Clone)]
pub struct SessionMirror {
    self_id: ParticipantId,
    session: Option<GameSession>,
}

impl SessionMirror {
    #[must_use]
    pub fn new(self_id: ParticipantId) -> Self {
        Self { self_id, session: None }
    }

    #[must_use]
    pub fn self_id(&self) -> ParticipantId {
        self.self_id
    }

    #[must_use]
    pub fn session(&self) -> Option<&GameSession> {
        self.session.as_ref()
    }

    /// Apply one pushed event. Returns `true` if the view changed.
    ///
    /// Deltas that arrive before the first snapshot are dropped; the
    /// snapshot already reflects them.
    pub fn apply(&mut self, event: SessionEvent) -> bool {
        if let SessionEvent::Snapshot { session } = event {
            self.session = Some(session);
            return true;
        }
        let Some(session) = self.session.as_mut() else {
            return false;
        };

        match event {
            SessionEvent::Snapshot { .. } => false,
            SessionEvent::ParticipantJoined { participant } => {
                session.upsert_participant(participant);
                true
            }
            SessionEvent::ParticipantLeft { participant_id } => session.deactivate(participant_id),
            SessionEvent::CursorMoved { participant_id, cursor } => {
                session.write_cursor(participant_id, cursor) == WriteOutcome::Applied
            }
            SessionEvent::InputChanged { participant_id, input } => {
                session.write_input(participant_id, input) == WriteOutcome::Applied
            }
            SessionEvent::ControlChanged { control } => {
                let changed = session.control() != control;
                session.set_control(control);
                changed
            }
            SessionEvent::ItemChanged { item_index } => {
                let changed = session.current_item_index != item_index;
                session.current_item_index = item_index;
                changed
            }
        }
    }

    /// Other participants' cursors to draw at `now`.
    #[must_use]
    pub fn visible_cursors(&self, now: i64) -> Vec<RemoteCursor> {
        self.session
            .as_ref()
            .map(|s| filter::visible_cursors(s, self.self_id, now))
            .unwrap_or_default()
    }

    /// Other participants' answers for `active_item` to draw at `now`.
    #[must_use]
    pub fn visible_inputs(&self, active_item: u32, now: i64) -> Vec<RemoteInput> {
        self.session
            .as_ref()
            .map(|s| filter::visible_inputs(s, self.self_id, active_item, now))
            .unwrap_or_default()
    }

    /// Whether local exercise controls should be enabled.
    #[must_use]
    pub fn can_act(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| control::can_act(s, self.self_id))
    }

    /// Whether the local participant is the host (shows control-mode UI).
    #[must_use]
    pub fn is_host(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.is_host(self.self_id))
    }

    /// Local participant's palette color.
    #[must_use]
    pub fn color(&self) -> &'static str {
        let participants = self
            .session
            .as_ref()
            .map_or(&[][..], |s| s.participants.as_slice());
        participant_color(self.self_id, participants)
    }
}
