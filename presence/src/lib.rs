//! Shared session model and presence logic for multiplayer game sessions.
//!
//! This crate owns the types exchanged between `server` and any client: the
//! `GameSession` record, control-mode arbitration rules, the cursor throttle
//! and input tracker used before writes leave a client, and the staleness
//! filters used when rendering other participants.
//!
//! DESIGN
//! ======
//! - Everything here is synchronous and clock-free. Callers pass `now`
//!   explicitly so the same functions run on the server, in a browser, and
//!   in tests.
//! - The server and the client mirror share one write path
//!   (`GameSession::write_cursor` / `write_input`) so sequence rejection
//!   behaves identically on both sides.

pub mod broadcast;
pub mod color;
pub mod control;
pub mod event;
pub mod filter;
pub mod mirror;
pub mod model;

pub use broadcast::{ContainerRect, CursorSample, CursorThrottle, InputSample, InputTracker};
pub use color::{PARTICIPANT_COLORS, participant_color};
pub use control::{ControlError, can_act};
pub use event::SessionEvent;
pub use filter::{RemoteCursor, RemoteInput, is_fresh, visible_cursors, visible_inputs};
pub use mirror::SessionMirror;
pub use model::{
    CURSOR_STALE_MS, ControlMode, ControlState, CursorEntry, GameSession, INPUT_STALE_MS, InputEntry, Participant,
    ParticipantId, SessionId, ValidationError, WriteOutcome,
};
