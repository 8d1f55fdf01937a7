//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor.
//! It holds the optional database pool and a map of live sessions. Each
//! session carries its authoritative `GameSession` record, the connections
//! subscribed to it, resume-token hashes, and a version pair used by the
//! persistence task to detect unflushed durable changes.

use std::collections::HashMap;
use std::sync::Arc;

use presence::{GameSession, ParticipantId, SessionId};
use sqlx::PgPool;
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::frame::Frame;
use crate::rate_limit::RateLimiter;

// =============================================================================
// CONNECTED CLIENT
// =============================================================================

/// One websocket connection subscribed to a session.
pub struct ConnectedClient {
    /// Participant identity bound to this connection at create/join.
    pub participant_id: ParticipantId,
    pub tx: mpsc::Sender<Frame>,
}

// =============================================================================
// LIVE SESSION
// =============================================================================

/// Per-session live state. Kept in memory for real-time fan-out.
/// Durable fields are flushed to Postgres by the persistence task.
pub struct LiveSession {
    pub record: GameSession,
    /// Connected clients: `client_id` -> bound participant and outbound sender.
    pub clients: HashMap<Uuid, ConnectedClient>,
    /// SHA-256 hex of each participant's resume token.
    pub token_hashes: HashMap<ParticipantId, String>,
    /// Bumped on every durable change (membership, control, item).
    pub version: u64,
    /// Last version written to Postgres.
    pub flushed_version: u64,
}

impl LiveSession {
    /// Wrap a freshly created record. Starts dirty so the first flush persists it.
    #[must_use]
    pub fn new(record: GameSession) -> Self {
        Self { record, clients: HashMap::new(), token_hashes: HashMap::new(), version: 1, flushed_version: 0 }
    }

    /// Wrap a record loaded from Postgres. Starts clean.
    #[must_use]
    pub fn hydrated(record: GameSession, token_hashes: HashMap<ParticipantId, String>) -> Self {
        Self { record, clients: HashMap::new(), token_hashes, version: 0, flushed_version: 0 }
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.version != self.flushed_version
    }

    pub fn mark_dirty(&mut self) {
        self.version += 1;
    }

    /// The connection bound to `participant_id`, if any.
    #[must_use]
    pub fn holder(&self, participant_id: ParticipantId) -> Option<Uuid> {
        self.clients
            .iter()
            .find(|(_, c)| c.participant_id == participant_id)
            .map(|(client_id, _)| *client_id)
    }
}

// =============================================================================
// APP STATE
// =============================================================================

/// Shared application state, injected into Axum handlers via State extractor.
/// Clone is required by Axum; all inner fields are Arc-wrapped or Clone.
#[derive(Clone)]
pub struct AppState {
    /// `None` when `DATABASE_URL` is unset. Sessions then live only in memory.
    pub pool: Option<PgPool>,
    pub sessions: Arc<RwLock<HashMap<SessionId, LiveSession>>>,
    /// Per-participant write limits for cursor and input traffic.
    pub rate_limiter: RateLimiter,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    #[must_use]
    pub fn new(pool: Option<PgPool>, config: ServerConfig) -> Self {
        Self {
            pool,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            rate_limiter: RateLimiter::from_config(&config),
            config: Arc::new(config),
        }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================
