//! Session record types and the last-write-wins write path.
//!
//! DESIGN
//! ======
//! A `GameSession` is the only shared mutable resource of a multiplayer game
//! instance. Every participant writes only its own keyed entries
//! (`cursors[id]`, `inputs[id]`); the host alone writes control state.
//!
//! Entries carry a per-writer `seq`. A write whose `seq` is not greater than
//! the stored one is rejected as stale, so a reordered retry cannot clobber a
//! fresher sample. `seq == 0` marks an unsequenced writer and always applies.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[cfg(test)]
#[path = "model_test.rs"]
mod model_test;

/// Opaque game-session identifier, minted by the server.
pub type SessionId = Uuid;

/// Opaque participant identifier, bound to a connection by the server.
pub type ParticipantId = Uuid;

/// Cursor entries at least this old are treated as absent by readers.
pub const CURSOR_STALE_MS: i64 = 5_000;

/// Input entries at least this old are treated as absent by readers.
pub const INPUT_STALE_MS: i64 = 10_000;

pub const MAX_DISPLAY_NAME_CHARS: usize = 64;
pub const MAX_INPUT_CHARS: usize = 500;
pub const MAX_TOTAL_ITEMS: u32 = 1_000;

// =============================================================================
// VALIDATION
// =============================================================================

/// Field validation failures at the storage boundary.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("{field} must be a finite number")]
    NotFinite { field: &'static str },
    #[error("{field} out of range: {value} (expected 0..=100)")]
    OutOfRange { field: &'static str, value: f64 },
    #[error("display name must not be empty")]
    EmptyDisplayName,
    #[error("display name exceeds {max} characters")]
    DisplayNameTooLong { max: usize },
    #[error("input value exceeds {max} characters")]
    InputTooLong { max: usize },
    #[error("total_items must be between 1 and {max}")]
    TotalItemsOutOfRange { max: u32 },
    #[error("item index {index} out of range (session has {total} items)")]
    ItemOutOfRange { index: u32, total: u32 },
}

/// Validate a container-relative percentage coordinate.
///
/// # Errors
///
/// Returns an error for NaN/infinite values or values outside `[0, 100]`.
pub fn validate_percent(field: &'static str, value: f64) -> Result<f64, ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NotFinite { field });
    }
    if !(0.0..=100.0).contains(&value) {
        return Err(ValidationError::OutOfRange { field, value });
    }
    Ok(value)
}

/// Trim and bound a participant display name.
///
/// # Errors
///
/// Returns an error if the trimmed name is empty or too long.
pub fn normalize_display_name(raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyDisplayName);
    }
    if trimmed.chars().count() > MAX_DISPLAY_NAME_CHARS {
        return Err(ValidationError::DisplayNameTooLong { max: MAX_DISPLAY_NAME_CHARS });
    }
    Ok(trimmed.to_owned())
}

/// Bound the length of an in-progress answer.
///
/// # Errors
///
/// Returns an error if the value exceeds [`MAX_INPUT_CHARS`].
pub fn validate_input_value(value: &str) -> Result<(), ValidationError> {
    if value.chars().count() > MAX_INPUT_CHARS {
        return Err(ValidationError::InputTooLong { max: MAX_INPUT_CHARS });
    }
    Ok(())
}

/// Bound the number of exercise items a session can hold.
///
/// # Errors
///
/// Returns an error for zero or more than [`MAX_TOTAL_ITEMS`].
pub fn validate_total_items(total_items: u32) -> Result<u32, ValidationError> {
    if total_items == 0 || total_items > MAX_TOTAL_ITEMS {
        return Err(ValidationError::TotalItemsOutOfRange { max: MAX_TOTAL_ITEMS });
    }
    Ok(total_items)
}

// =============================================================================
// PARTICIPANT
// =============================================================================

/// One connected browser session within a game instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub participant_id: ParticipantId,
    pub display_name: String,
    pub is_host: bool,
    pub is_active: bool,
    /// Server clock, milliseconds since Unix epoch.
    pub joined_at: i64,
}

// =============================================================================
// ENTRIES
// =============================================================================

/// Last known pointer position of one participant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CursorEntry {
    /// Percent of container width, 0–100.
    pub x: f64,
    /// Percent of container height, 0–100.
    pub y: f64,
    /// Server-stamped, milliseconds since Unix epoch.
    pub last_update: i64,
    #[serde(default)]
    pub seq: u64,
}

impl CursorEntry {
    /// Build a validated cursor entry.
    ///
    /// # Errors
    ///
    /// Returns an error if either coordinate is outside `[0, 100]`.
    pub fn new(x: f64, y: f64, last_update: i64, seq: u64) -> Result<Self, ValidationError> {
        Ok(Self { x: validate_percent("x", x)?, y: validate_percent("y", y)?, last_update, seq })
    }
}

/// In-progress answer of one participant for one exercise item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputEntry {
    pub value: String,
    pub item_index: u32,
    /// Server-stamped, milliseconds since Unix epoch.
    pub last_update: i64,
    #[serde(default)]
    pub seq: u64,
}

impl InputEntry {
    /// Build a validated input entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is too long.
    pub fn new(value: impl Into<String>, item_index: u32, last_update: i64, seq: u64) -> Result<Self, ValidationError> {
        let value = value.into();
        validate_input_value(&value)?;
        Ok(Self { value, item_index, last_update, seq })
    }
}

// =============================================================================
// CONTROL
// =============================================================================

/// Session-wide policy for who may mutate shared exercise state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlMode {
    /// Every active participant may act.
    #[default]
    Free,
    /// Only `controlled_by` may act.
    Single,
    /// Only the host may act.
    HostOnly,
}

impl ControlMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Single => "single",
            Self::HostOnly => "host_only",
        }
    }

    /// Parse the wire spelling of a mode.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "free" => Some(Self::Free),
            "single" => Some(Self::Single),
            "host_only" => Some(Self::HostOnly),
            _ => None,
        }
    }
}

impl fmt::Display for ControlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `(control_mode, controlled_by)` field pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlState {
    pub mode: ControlMode,
    pub controlled_by: Option<ParticipantId>,
}

// =============================================================================
// GAME SESSION
// =============================================================================

/// Result of a keyed last-write-wins write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    /// Dropped: the stored entry carries a newer sequence number.
    Stale,
}

/// Shared record of one multiplayer game instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameSession {
    pub session_id: SessionId,
    /// Ordered by join time. Participants are never removed.
    pub participants: Vec<Participant>,
    #[serde(default)]
    pub cursors: HashMap<ParticipantId, CursorEntry>,
    #[serde(default)]
    pub inputs: HashMap<ParticipantId, InputEntry>,
    pub control_mode: ControlMode,
    pub controlled_by: Option<ParticipantId>,
    /// Exercise item the group is currently on. Always below `total_items`.
    #[serde(default)]
    pub current_item_index: u32,
    /// Number of items in the exercise, fixed at creation.
    pub total_items: u32,
}

impl GameSession {
    /// Create a session with its host as the first participant.
    ///
    /// In `single` mode the host starts out holding control.
    #[must_use]
    pub fn new(
        session_id: SessionId,
        host_id: ParticipantId,
        host_name: impl Into<String>,
        control_mode: ControlMode,
        total_items: u32,
        now: i64,
    ) -> Self {
        let host = Participant {
            participant_id: host_id,
            display_name: host_name.into(),
            is_host: true,
            is_active: true,
            joined_at: now,
        };
        let controlled_by = (control_mode == ControlMode::Single).then_some(host_id);
        Self {
            session_id,
            participants: vec![host],
            cursors: HashMap::new(),
            inputs: HashMap::new(),
            control_mode,
            controlled_by,
            current_item_index: 0,
            total_items,
        }
    }

    #[must_use]
    pub fn participant(&self, participant_id: ParticipantId) -> Option<&Participant> {
        self.participants
            .iter()
            .find(|p| p.participant_id == participant_id)
    }

    #[must_use]
    pub fn participant_index(&self, participant_id: ParticipantId) -> Option<usize> {
        self.participants
            .iter()
            .position(|p| p.participant_id == participant_id)
    }

    #[must_use]
    pub fn host(&self) -> Option<&Participant> {
        self.participants.iter().find(|p| p.is_host)
    }

    #[must_use]
    pub fn is_host(&self, participant_id: ParticipantId) -> bool {
        self.participant(participant_id).is_some_and(|p| p.is_host)
    }

    #[must_use]
    pub fn is_active(&self, participant_id: ParticipantId) -> bool {
        self.participant(participant_id).is_some_and(|p| p.is_active)
    }

    /// Check that `index` names an item of this exercise.
    ///
    /// # Errors
    ///
    /// Returns `ItemOutOfRange` when `index >= total_items`.
    pub fn check_item(&self, index: u32) -> Result<(), ValidationError> {
        if index >= self.total_items {
            return Err(ValidationError::ItemOutOfRange { index, total: self.total_items });
        }
        Ok(())
    }

    #[must_use]
    pub fn control(&self) -> ControlState {
        ControlState { mode: self.control_mode, controlled_by: self.controlled_by }
    }

    pub fn set_control(&mut self, control: ControlState) {
        self.control_mode = control.mode;
        self.controlled_by = control.controlled_by;
    }

    /// Add a new participant, or re-activate an existing one in place.
    ///
    /// Re-activation keeps `is_host`, `joined_at`, and list position, so
    /// color assignment stays stable across reconnects.
    pub fn join(&mut self, participant_id: ParticipantId, display_name: impl Into<String>, now: i64) -> Participant {
        let display_name = display_name.into();
        let participant = match self.participant(participant_id) {
            Some(existing) => Participant { display_name, is_active: true, ..existing.clone() },
            None => Participant { participant_id, display_name, is_host: false, is_active: true, joined_at: now },
        };
        self.upsert_participant(participant.clone());
        participant
    }

    /// Insert or replace a participant record.
    ///
    /// The participant's cursor and input entries are cleared: a rejoining
    /// client restarts its sequence counter, and old entries would otherwise
    /// shadow its first writes.
    pub fn upsert_participant(&mut self, participant: Participant) {
        let participant_id = participant.participant_id;
        match self.participant_index(participant_id) {
            Some(idx) => self.participants[idx] = participant,
            None => self.participants.push(participant),
        }
        self.cursors.remove(&participant_id);
        self.inputs.remove(&participant_id);
    }

    /// Mark a participant inactive. Returns `true` if the flag changed.
    pub fn deactivate(&mut self, participant_id: ParticipantId) -> bool {
        let Some(p) = self
            .participants
            .iter_mut()
            .find(|p| p.participant_id == participant_id)
        else {
            return false;
        };
        let changed = p.is_active;
        p.is_active = false;
        changed
    }

    /// Overwrite a participant's cursor unless the stored entry is newer.
    pub fn write_cursor(&mut self, participant_id: ParticipantId, entry: CursorEntry) -> WriteOutcome {
        let current = self.cursors.get(&participant_id).map(|c| c.seq);
        if !supersedes(entry.seq, current) {
            return WriteOutcome::Stale;
        }
        self.cursors.insert(participant_id, entry);
        WriteOutcome::Applied
    }

    /// Overwrite a participant's input unless the stored entry is newer.
    pub fn write_input(&mut self, participant_id: ParticipantId, entry: InputEntry) -> WriteOutcome {
        let current = self.inputs.get(&participant_id).map(|i| i.seq);
        if !supersedes(entry.seq, current) {
            return WriteOutcome::Stale;
        }
        self.inputs.insert(participant_id, entry);
        WriteOutcome::Applied
    }
}

fn supersedes(incoming: u64, current: Option<u64>) -> bool {
    match current {
        None => true,
        Some(_) if incoming == 0 => true,
        Some(current) => incoming > current,
    }
}
