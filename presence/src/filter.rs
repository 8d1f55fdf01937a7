//! Render-time filtering of other participants' cursors and inputs.
//!
//! Stale entries are not errors. They stay in the record until overwritten
//! and are simply left out here. Results follow participant join order.

use crate::color::participant_color;
use crate::model::{CURSOR_STALE_MS, GameSession, INPUT_STALE_MS, ParticipantId};

#[cfg(test)]
#[path = "filter_test.rs"]
mod filter_test;

/// Another participant's cursor, ready to draw.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteCursor {
    pub participant_id: ParticipantId,
    pub display_name: String,
    pub color: &'static str,
    pub x: f64,
    pub y: f64,
}

/// Another participant's in-progress answer, ready to draw as a chip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteInput {
    pub participant_id: ParticipantId,
    pub display_name: String,
    pub color: &'static str,
    pub value: String,
}

/// An entry stamped at `last_update` is fresh while `now - last_update < window_ms`.
#[must_use]
pub fn is_fresh(last_update: i64, now: i64, window_ms: i64) -> bool {
    now.saturating_sub(last_update) < window_ms
}

/// Cursors of active participants other than `self_id`, fresher than 5s.
#[must_use]
pub fn visible_cursors(session: &GameSession, self_id: ParticipantId, now: i64) -> Vec<RemoteCursor> {
    session
        .participants
        .iter()
        .filter(|p| p.participant_id != self_id && p.is_active)
        .filter_map(|p| {
            let cursor = session.cursors.get(&p.participant_id)?;
            if !is_fresh(cursor.last_update, now, CURSOR_STALE_MS) {
                return None;
            }
            Some(RemoteCursor {
                participant_id: p.participant_id,
                display_name: p.display_name.clone(),
                color: participant_color(p.participant_id, &session.participants),
                x: cursor.x,
                y: cursor.y,
            })
        })
        .collect()
}

/// Non-blank inputs of other participants for `active_item`, fresher than 10s.
#[must_use]
pub fn visible_inputs(session: &GameSession, self_id: ParticipantId, active_item: u32, now: i64) -> Vec<RemoteInput> {
    session
        .participants
        .iter()
        .filter(|p| p.participant_id != self_id)
        .filter_map(|p| {
            let input = session.inputs.get(&p.participant_id)?;
            let keep = input.item_index == active_item
                && is_fresh(input.last_update, now, INPUT_STALE_MS)
                && !input.value.trim().is_empty();
            keep.then(|| RemoteInput {
                participant_id: p.participant_id,
                display_name: p.display_name.clone(),
                color: participant_color(p.participant_id, &session.participants),
                value: input.value.clone(),
            })
        })
        .collect()
}
