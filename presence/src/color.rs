//! Deterministic participant colors.
//!
//! Colors are cosmetic, not identity: a participant's color is its index in
//! the join-ordered `participants` list, modulo the palette size. It stays
//! stable as long as list order does, which holds because participants are
//! never removed.

use crate::model::{Participant, ParticipantId};

#[cfg(test)]
#[path = "color_test.rs"]
mod color_test;

pub const PARTICIPANT_COLORS: [&str; 10] = [
    "#ef4444", "#3b82f6", "#22c55e", "#f59e0b", "#a855f7", "#ec4899", "#14b8a6", "#f97316", "#6366f1", "#84cc16",
];

/// Color for ids that are not in the participant list.
pub const UNKNOWN_PARTICIPANT_COLOR: &str = "#9ca3af";

/// Palette color for a participant, by join order.
#[must_use]
pub fn participant_color(participant_id: ParticipantId, participants: &[Participant]) -> &'static str {
    participants
        .iter()
        .position(|p| p.participant_id == participant_id)
        .map_or(UNKNOWN_PARTICIPANT_COLOR, |idx| PARTICIPANT_COLORS[idx % PARTICIPANT_COLORS.len()])
}
