//! Persistence service — background flush for dirty sessions.
//!
//! DESIGN
//! ======
//! Only the durable part of a session is written: participants, resume-token
//! hashes, control state, and the current item. Cursors and inputs are
//! ephemeral and never touch Postgres. A background task flushes dirty
//! sessions every `FLUSH_INTERVAL_MS`, so websocket handling never blocks on
//! database I/O. A flushed session with no connected clients is evicted.
//!
//! ERROR HANDLING
//! ==============
//! A session's flushed version advances only after a successful write and
//! only up to the version that was captured. Repeated upserts are acceptable,
//! silently dropping a membership change is not.

use std::collections::HashMap;
use std::time::Duration;

use presence::{ControlMode, GameSession, Participant, ParticipantId, SessionId};
use sqlx::PgPool;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::state::{AppState, LiveSession};

// =============================================================================
// SNAPSHOT
// =============================================================================

/// Immutable copy of a session's durable state, captured under the lock.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub record: GameSession,
    pub token_hashes: HashMap<ParticipantId, String>,
    pub version: u64,
}

impl SessionSnapshot {
    #[must_use]
    pub fn capture(session_id: SessionId, live: &LiveSession) -> Self {
        Self { session_id, record: live.record.clone(), token_hashes: live.token_hashes.clone(), version: live.version }
    }
}

/// Record a successful flush of `version`. A newer in-memory change keeps
/// the session dirty.
pub fn acknowledge_flush(live: &mut LiveSession, version: u64) {
    if version > live.flushed_version {
        live.flushed_version = version;
    }
}

/// Acknowledge a successful flush, then drop the session if it is clean and
/// no client is connected. Returns `true` if it was evicted.
pub(crate) fn settle_flush(sessions: &mut HashMap<SessionId, LiveSession>, session_id: SessionId, version: u64) -> bool {
    let Some(live) = sessions.get_mut(&session_id) else {
        return false;
    };
    acknowledge_flush(live, version);
    if !live.clients.is_empty() || live.is_dirty() {
        return false;
    }
    sessions.remove(&session_id);
    info!(%session_id, "evicted session from memory");
    true
}

// =============================================================================
// BACKGROUND TASK
// =============================================================================

/// Spawn the background persistence task. Returns `None` when no database
/// is configured.
#[must_use]
pub fn spawn_persistence_task(state: AppState) -> Option<JoinHandle<()>> {
    let pool = state.pool.clone()?;
    let flush_interval_ms = state.config.flush_interval_ms;
    info!(flush_interval_ms, "session persistence flush configured");
    Some(tokio::spawn(async move {
        loop {
            flush_all_dirty(&state, &pool).await;
            tokio::time::sleep(Duration::from_millis(flush_interval_ms)).await;
        }
    }))
}

/// Capture every dirty session under one short lock.
pub(crate) async fn collect_dirty(state: &AppState) -> Vec<SessionSnapshot> {
    let sessions = state.sessions.read().await;
    sessions
        .iter()
        .filter(|(_, live)| live.is_dirty())
        .map(|(session_id, live)| SessionSnapshot::capture(*session_id, live))
        .collect()
}

async fn flush_all_dirty(state: &AppState, pool: &PgPool) {
    for snapshot in collect_dirty(state).await {
        match flush_session(pool, &snapshot).await {
            Ok(()) => {
                let mut sessions = state.sessions.write().await;
                settle_flush(&mut sessions, snapshot.session_id, snapshot.version);
            }
            Err(e) => {
                error!(error = %e, session_id = %snapshot.session_id, "persistence flush failed");
            }
        }
    }
}

// =============================================================================
// QUERIES
// =============================================================================

/// Upsert a session row and all of its participants in one transaction.
///
/// # Errors
///
/// Returns a database error if any statement fails. Nothing is committed then.
pub async fn flush_session(pool: &PgPool, snapshot: &SessionSnapshot) -> Result<(), sqlx::Error> {
    let record = &snapshot.record;
    let item_index = i32::try_from(record.current_item_index).unwrap_or(i32::MAX);
    let total_items = i32::try_from(record.total_items).unwrap_or(i32::MAX);

    let mut tx = pool.begin().await?;
    sqlx::query(
        "INSERT INTO game_sessions (id, control_mode, controlled_by, current_item_index, total_items, updated_at) \
         VALUES ($1, $2, $3, $4, $5, now()) \
         ON CONFLICT (id) DO UPDATE SET \
             control_mode = EXCLUDED.control_mode, controlled_by = EXCLUDED.controlled_by, \
             current_item_index = EXCLUDED.current_item_index, updated_at = now()",
    )
    .bind(snapshot.session_id)
    .bind(record.control_mode.as_str())
    .bind(record.controlled_by)
    .bind(item_index)
    .bind(total_items)
    .execute(tx.as_mut())
    .await?;

    for (position, participant) in record.participants.iter().enumerate() {
        let position = i32::try_from(position).unwrap_or(i32::MAX);
        let token_hash = snapshot
            .token_hashes
            .get(&participant.participant_id)
            .map_or("", String::as_str);
        sqlx::query(
            "INSERT INTO game_participants \
                 (session_id, participant_id, position, display_name, is_host, is_active, joined_at, token_hash) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (session_id, participant_id) DO UPDATE SET \
                 display_name = EXCLUDED.display_name, is_active = EXCLUDED.is_active, \
                 token_hash = EXCLUDED.token_hash",
        )
        .bind(snapshot.session_id)
        .bind(participant.participant_id)
        .bind(position)
        .bind(&participant.display_name)
        .bind(participant.is_host)
        .bind(participant.is_active)
        .bind(participant.joined_at)
        .bind(token_hash)
        .execute(tx.as_mut())
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Load a persisted session. Every participant comes back inactive, since no
/// connection holds them yet.
///
/// # Errors
///
/// Returns a database error if either query fails.
pub async fn load_session(pool: &PgPool, session_id: SessionId) -> Result<Option<LiveSession>, sqlx::Error> {
    let Some((mode, item_index, total_items)) = sqlx::query_as::<_, (String, i32, i32)>(
        "SELECT control_mode, current_item_index, total_items FROM game_sessions WHERE id = $1",
    )
    .bind(session_id)
    .fetch_optional(pool)
    .await?
    else {
        return Ok(None);
    };

    let rows = sqlx::query_as::<_, (ParticipantId, String, bool, i64, String)>(
        "SELECT participant_id, display_name, is_host, joined_at, token_hash \
         FROM game_participants WHERE session_id = $1 ORDER BY position",
    )
    .bind(session_id)
    .fetch_all(pool)
    .await?;

    let mut participants = Vec::with_capacity(rows.len());
    let mut token_hashes = HashMap::with_capacity(rows.len());
    for (participant_id, display_name, is_host, joined_at, token_hash) in rows {
        participants.push(Participant { participant_id, display_name, is_host, is_active: false, joined_at });
        token_hashes.insert(participant_id, token_hash);
    }

    let record = hydrate_record(
        session_id,
        participants,
        ControlMode::parse(&mode).unwrap_or_default(),
        u32::try_from(item_index).unwrap_or(0),
        u32::try_from(total_items).unwrap_or(1),
    );
    Ok(Some(LiveSession::hydrated(record, token_hashes)))
}

/// Build a record from persisted fields. A stored `single` controller is
/// inactive after a reload, so control starts out `free`. Rows written
/// before `total_items` existed are widened to cover their current item.
pub(crate) fn hydrate_record(
    session_id: SessionId,
    participants: Vec<Participant>,
    control_mode: ControlMode,
    current_item_index: u32,
    total_items: u32,
) -> GameSession {
    let control_mode = match control_mode {
        ControlMode::Single => ControlMode::Free,
        other => other,
    };
    GameSession {
        session_id,
        participants,
        cursors: HashMap::new(),
        inputs: HashMap::new(),
        control_mode,
        controlled_by: None,
        current_item_index,
        total_items: total_items.max(current_item_index.saturating_add(1)),
    }
}

#[cfg(test)]
#[path = "persistence_test.rs"]
mod tests;
