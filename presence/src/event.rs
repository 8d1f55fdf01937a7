//! Change feed pushed from the server to every subscriber of a session.
//!
//! Each event travels as the flat `data` payload of a frame, discriminated by
//! its `type` field.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::model::{ControlState, CursorEntry, GameSession, InputEntry, Participant, ParticipantId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Full record. Sent on create, join, and explicit fetch.
    Snapshot { session: GameSession },
    ParticipantJoined { participant: Participant },
    ParticipantLeft { participant_id: ParticipantId },
    CursorMoved { participant_id: ParticipantId, cursor: CursorEntry },
    InputChanged { participant_id: ParticipantId, input: InputEntry },
    ControlChanged { control: ControlState },
    ItemChanged { item_index: u32 },
}

impl SessionEvent {
    /// Serialize into a flat frame payload.
    #[must_use]
    pub fn to_map(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    /// Parse a frame payload back into an event.
    ///
    /// # Errors
    ///
    /// Returns an error if `type` is missing/unknown or a field is malformed.
    pub fn from_map(map: Map<String, Value>) -> Result<Self, serde_json::Error> {
        serde_json::from_value(Value::Object(map))
    }
}
