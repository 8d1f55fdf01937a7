//! Session service — membership, resume tokens, and fan-out.
//!
//! DESIGN
//! ======
//! Sessions are created and joined via WS frames. A session lives in memory
//! while any client is connected; with a database configured it is hydrated
//! from Postgres on join and evicted after the last client leaves.
//!
//! Each connection binds exactly one participant at create/join. Every later
//! write on that connection acts as that participant, so clients cannot write
//! entries keyed to someone else. A participant is held by at most one
//! connection at a time: its `seq` counter belongs to that connection.
//!
//! ERROR HANDLING
//! ==============
//! On last-client leave, a dirty session is flushed before eviction. If that
//! flush fails the session stays in memory with its dirty version intact so
//! the persistence worker can retry. Without a database nothing is evicted.

use std::fmt::Write;

use presence::control::release_participant;
use presence::model::{normalize_display_name, validate_total_items};
use presence::{ControlError, ControlMode, GameSession, Participant, ParticipantId, SessionEvent, SessionId, ValidationError};
use rand::Rng;
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::frame::{ErrorCode, Frame, now_ms};
use crate::rate_limit::RateLimitError;
use crate::services::persistence;
use crate::state::{AppState, ConnectedClient, LiveSession};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(SessionId),
    #[error("must create or join a session first")]
    NotJoined,
    #[error("invalid resume token for participant {0}")]
    InvalidToken(ParticipantId),
    #[error("participant {0} is already connected")]
    AlreadyConnected(ParticipantId),
    #[error(transparent)]
    Control(#[from] ControlError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{0}")]
    InvalidField(String),
    #[error(transparent)]
    RateLimited(#[from] RateLimitError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ErrorCode for SessionError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_SESSION_NOT_FOUND",
            Self::NotJoined => "E_NOT_JOINED",
            Self::InvalidToken(_) => "E_INVALID_TOKEN",
            Self::AlreadyConnected(_) => "E_ALREADY_CONNECTED",
            Self::Control(ControlError::NotHost(_)) => "E_NOT_HOST",
            Self::Control(ControlError::NotSingleMode(_)) => "E_NOT_SINGLE_MODE",
            Self::Control(ControlError::UnknownParticipant(_)) => "E_UNKNOWN_PARTICIPANT",
            Self::Control(ControlError::InactiveParticipant(_)) => "E_PARTICIPANT_INACTIVE",
            Self::Control(ControlError::NotPermitted(..)) => "E_NOT_PERMITTED",
            Self::Validation(_) | Self::InvalidField(_) => "E_INVALID_FIELD",
            Self::RateLimited(_) => "E_RATE_LIMITED",
            Self::Database(_) => "E_DATABASE",
        }
    }

    fn retryable(&self) -> bool {
        // The holding connection may be about to close.
        matches!(self, Self::AlreadyConnected(_) | Self::RateLimited(_) | Self::Database(_))
    }
}

/// Result of a successful create or join.
#[derive(Debug, Clone)]
pub struct Membership {
    pub session_id: SessionId,
    pub participant: Participant,
    /// Plaintext resume token. Only its hash is kept server-side.
    pub token: String,
    pub snapshot: GameSession,
}

/// Credentials for re-activating an existing participant.
#[derive(Debug, Clone)]
pub struct Resume {
    pub participant_id: ParticipantId,
    pub token: String,
}

// =============================================================================
// TOKENS
// =============================================================================

pub(crate) fn bytes_to_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

/// Generate a cryptographically random 32-byte hex resume token.
#[must_use]
pub fn generate_token() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    bytes_to_hex(&bytes)
}

#[must_use]
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    bytes_to_hex(&hasher.finalize())
}

// =============================================================================
// CREATE / JOIN
// =============================================================================

/// Create a session with the caller as host and bind `client_id` to it.
///
/// # Errors
///
/// Returns a validation error if the display name is blank or too long, or
/// `total_items` is zero or above the cap.
pub async fn create_session(
    state: &AppState,
    client_id: Uuid,
    tx: mpsc::Sender<Frame>,
    display_name: &str,
    control_mode: Option<ControlMode>,
    total_items: u32,
) -> Result<Membership, SessionError> {
    let display_name = normalize_display_name(display_name)?;
    let total_items = validate_total_items(total_items)?;
    let control_mode = control_mode.unwrap_or(state.config.default_control_mode);
    let session_id = Uuid::new_v4();
    let participant_id = Uuid::new_v4();
    let token = generate_token();

    let record = GameSession::new(session_id, participant_id, display_name, control_mode, total_items, now_ms());
    let participant = record.participants[0].clone();
    let snapshot = record.clone();

    let mut live = LiveSession::new(record);
    live.token_hashes
        .insert(participant_id, hash_token(&token));
    live.clients
        .insert(client_id, ConnectedClient { participant_id, tx });

    state.sessions.write().await.insert(session_id, live);
    info!(%session_id, %participant_id, %client_id, mode = %control_mode, total_items, "session created");

    Ok(Membership { session_id, participant, token, snapshot })
}

/// Join a session as a new participant, or re-activate one with `resume`.
/// Hydrates from Postgres if the session is not in memory.
///
/// # Errors
///
/// Returns `NotFound` for unknown sessions, `InvalidToken` when resume
/// credentials do not match, `AlreadyConnected` when another connection
/// still holds the resumed participant, and a database error if hydration
/// fails.
pub async fn join_session(
    state: &AppState,
    session_id: SessionId,
    client_id: Uuid,
    tx: mpsc::Sender<Frame>,
    display_name: &str,
    resume: Option<Resume>,
) -> Result<Membership, SessionError> {
    let display_name = normalize_display_name(display_name)?;
    ensure_loaded(state, session_id).await?;

    let mut sessions = state.sessions.write().await;
    let Some(live) = sessions.get_mut(&session_id) else {
        return Err(SessionError::NotFound(session_id));
    };

    let now = now_ms();
    let (participant, token) = match resume {
        Some(resume) => {
            let matches = live
                .token_hashes
                .get(&resume.participant_id)
                .is_some_and(|stored| *stored == hash_token(&resume.token));
            if !matches {
                warn!(%session_id, participant_id = %resume.participant_id, "rejoin rejected: token mismatch");
                return Err(SessionError::InvalidToken(resume.participant_id));
            }
            if live
                .holder(resume.participant_id)
                .is_some_and(|holder| holder != client_id)
            {
                warn!(%session_id, participant_id = %resume.participant_id, "rejoin rejected: held by another connection");
                return Err(SessionError::AlreadyConnected(resume.participant_id));
            }
            (live.record.join(resume.participant_id, display_name, now), resume.token)
        }
        None => {
            let participant_id = Uuid::new_v4();
            let token = generate_token();
            live.token_hashes
                .insert(participant_id, hash_token(&token));
            (live.record.join(participant_id, display_name, now), token)
        }
    };

    live.clients
        .insert(client_id, ConnectedClient { participant_id: participant.participant_id, tx });
    live.mark_dirty();

    info!(
        %session_id,
        participant_id = %participant.participant_id,
        %client_id,
        clients = live.clients.len(),
        "participant joined session"
    );
    Ok(Membership { session_id, participant, token, snapshot: live.record.clone() })
}

async fn ensure_loaded(state: &AppState, session_id: SessionId) -> Result<(), SessionError> {
    if state.sessions.read().await.contains_key(&session_id) {
        return Ok(());
    }
    let Some(pool) = &state.pool else {
        return Err(SessionError::NotFound(session_id));
    };

    // Load outside the lock; a concurrent joiner may win the insert.
    let Some(loaded) = persistence::load_session(pool, session_id).await? else {
        return Err(SessionError::NotFound(session_id));
    };
    let participants = loaded.record.participants.len();
    state
        .sessions
        .write()
        .await
        .entry(session_id)
        .or_insert(loaded);
    info!(%session_id, participants, "hydrated session from database");
    Ok(())
}

// =============================================================================
// LEAVE
// =============================================================================

/// Unbind `client_id`. Its participant goes inactive and control falls back
/// if it held it.
///
/// Returns the events peers must see.
pub async fn leave_session(state: &AppState, session_id: SessionId, client_id: Uuid) -> Vec<SessionEvent> {
    let mut sessions = state.sessions.write().await;
    let Some(live) = sessions.get_mut(&session_id) else {
        return Vec::new();
    };
    let Some(client) = live.clients.remove(&client_id) else {
        return Vec::new();
    };
    info!(%session_id, %client_id, remaining = live.clients.len(), "client left session");
    release_unheld(state, live, session_id, client.participant_id)
}

/// Deactivate `participant_id` unless a connection still holds it.
fn release_unheld(
    state: &AppState,
    live: &mut LiveSession,
    session_id: SessionId,
    participant_id: ParticipantId,
) -> Vec<SessionEvent> {
    if live.holder(participant_id).is_some() {
        return Vec::new();
    }

    let mut events = Vec::new();
    if live.record.deactivate(participant_id) {
        events.push(SessionEvent::ParticipantLeft { participant_id });
        if let Some(control) = release_participant(&mut live.record, participant_id) {
            info!(%session_id, %participant_id, "controlling participant left; control reverted to free");
            events.push(SessionEvent::ControlChanged { control });
        }
        live.mark_dirty();
        state.rate_limiter.forget(participant_id);
    }
    events
}

/// A connection re-joined its own session as a different participant.
/// Releases the participant it held before and notifies peers.
pub async fn release_previous(state: &AppState, session_id: SessionId, previous: ParticipantId) {
    let events = {
        let mut sessions = state.sessions.write().await;
        let Some(live) = sessions.get_mut(&session_id) else {
            return;
        };
        release_unheld(state, live, session_id, previous)
    };
    notify_leave(state, session_id, &events).await;
}

async fn notify_leave(state: &AppState, session_id: SessionId, events: &[SessionEvent]) {
    for event in events {
        let frame = Frame::event("session:leave", session_id, event);
        broadcast(state, session_id, &frame, None).await;
    }
}

/// Leave, notify the remaining peers, and evict the session if idle.
pub async fn depart(state: &AppState, session_id: SessionId, client_id: Uuid) {
    let events = leave_session(state, session_id, client_id).await;
    notify_leave(state, session_id, &events).await;
    evict_if_idle(state, session_id).await;
}

/// Drop an idle session from memory once its durable state is in Postgres.
pub async fn evict_if_idle(state: &AppState, session_id: SessionId) {
    let Some(pool) = &state.pool else {
        return;
    };

    let mut sessions = state.sessions.write().await;
    let Some(live) = sessions.get(&session_id) else {
        return;
    };
    if !live.clients.is_empty() {
        return;
    }
    if !live.is_dirty() {
        sessions.remove(&session_id);
        info!(%session_id, "evicted session from memory");
        return;
    }

    // Flush outside the lock; dirty state is kept until the write succeeds.
    let snapshot = persistence::SessionSnapshot::capture(session_id, live);
    drop(sessions);
    let flush_result = persistence::flush_session(pool, &snapshot).await;

    let mut sessions = state.sessions.write().await;
    let Some(live) = sessions.get_mut(&session_id) else {
        return;
    };
    if !live.clients.is_empty() {
        return;
    }

    match flush_result {
        Ok(()) => {
            if !persistence::settle_flush(&mut sessions, session_id, snapshot.version) {
                warn!(%session_id, "retaining session after final flush because newer changes exist");
            }
        }
        Err(e) => {
            error!(error = %e, %session_id, "final flush failed; session retained for retry");
        }
    }
}

// =============================================================================
// READ
// =============================================================================

/// Current record of a session, from memory or else from Postgres.
///
/// # Errors
///
/// Returns `NotFound` if the session is unknown, or a database error.
pub async fn get_session(state: &AppState, session_id: SessionId) -> Result<GameSession, SessionError> {
    if let Some(live) = state.sessions.read().await.get(&session_id) {
        return Ok(live.record.clone());
    }
    let Some(pool) = &state.pool else {
        return Err(SessionError::NotFound(session_id));
    };
    persistence::load_session(pool, session_id)
        .await?
        .map(|live| live.record)
        .ok_or(SessionError::NotFound(session_id))
}

// =============================================================================
// BROADCAST
// =============================================================================

/// Broadcast a frame to all clients in a session, optionally excluding one.
pub async fn broadcast(state: &AppState, session_id: SessionId, frame: &Frame, exclude: Option<Uuid>) {
    let sessions = state.sessions.read().await;
    let Some(live) = sessions.get(&session_id) else {
        return;
    };

    for (client_id, client) in &live.clients {
        if exclude == Some(*client_id) {
            continue;
        }
        // Best-effort: if a client's channel is full, skip it.
        let _ = client.tx.try_send(frame.clone());
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
