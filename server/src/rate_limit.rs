//! In-memory rate limiting for participant writes.
//!
//! DESIGN
//! ======
//! Sliding-window counters backed by `HashMap<(ParticipantId, WriteKind),
//! VecDeque<Instant>>`, one window per participant and write kind:
//! - Cursor moves: the client throttle caps honest clients near 30/s; the
//!   server allows headroom (default 60/s) and drops the excess.
//! - Input updates: default 40/s; excess is rejected with `E_RATE_LIMITED`.
//!
//! Windows are one second long and pruned lazily on each check.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use presence::ParticipantId;

use crate::config::ServerConfig;

const WINDOW: Duration = Duration::from_secs(1);

/// Which write path a request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteKind {
    Cursor,
    Input,
}

impl WriteKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Cursor => "cursor",
            Self::Input => "input",
        }
    }
}

// =============================================================================
// ERROR TYPE
// =============================================================================

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("{} rate limit exceeded (max {limit} writes/s)", kind.as_str())]
pub struct RateLimitError {
    pub kind: WriteKind,
    pub limit: usize,
}

// =============================================================================
// RATE LIMITER
// =============================================================================

#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Mutex<HashMap<(ParticipantId, WriteKind), VecDeque<Instant>>>>,
    cursor_limit: usize,
    input_limit: usize,
}

impl RateLimiter {
    #[must_use]
    pub fn new(cursor_limit: usize, input_limit: usize) -> Self {
        Self { inner: Arc::new(Mutex::new(HashMap::new())), cursor_limit, input_limit }
    }

    #[must_use]
    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(config.cursor_writes_per_sec, config.input_writes_per_sec)
    }

    /// Check the participant's window for `kind`, then record the write.
    ///
    /// # Errors
    ///
    /// Returns `RateLimitError` if the window is full. Nothing is recorded.
    pub fn check_and_record(&self, participant_id: ParticipantId, kind: WriteKind) -> Result<(), RateLimitError> {
        self.check_and_record_at(participant_id, kind, Instant::now())
    }

    /// Internal: check + record with explicit timestamp (for testing).
    fn check_and_record_at(
        &self,
        participant_id: ParticipantId,
        kind: WriteKind,
        now: Instant,
    ) -> Result<(), RateLimitError> {
        let limit = self.limit(kind);
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let deque = inner.entry((participant_id, kind)).or_default();
        prune_window(deque, now, WINDOW);
        if deque.len() >= limit {
            return Err(RateLimitError { kind, limit });
        }
        deque.push_back(now);
        Ok(())
    }

    /// Drop all windows for a participant that left.
    pub fn forget(&self, participant_id: ParticipantId) {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.retain(|(id, _), _| *id != participant_id);
    }

    fn limit(&self, kind: WriteKind) -> usize {
        match kind {
            WriteKind::Cursor => self.cursor_limit,
            WriteKind::Input => self.input_limit,
        }
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn prune_window(deque: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(&front) = deque.front() {
        if now.duration_since(front) >= window {
            deque.pop_front();
        } else {
            break;
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[path = "rate_limit_test.rs"]
mod tests;
