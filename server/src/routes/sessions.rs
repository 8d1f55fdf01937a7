//! Session REST routes — read-only snapshot lookup.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use presence::GameSession;
use uuid::Uuid;

use crate::services::session::{self, SessionError};
use crate::state::AppState;

/// `GET /api/sessions/:id` — current record, from memory or storage.
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<GameSession>, StatusCode> {
    session::get_session(&state, session_id)
        .await
        .map(Json)
        .map_err(session_error_to_status)
}

pub(crate) fn session_error_to_status(err: SessionError) -> StatusCode {
    match err {
        SessionError::NotFound(_) => StatusCode::NOT_FOUND,
        SessionError::Database(e) => {
            tracing::error!(error = %e, "sessions: lookup failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[cfg(test)]
#[path = "sessions_test.rs"]
mod tests;
