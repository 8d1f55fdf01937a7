//! Client-side gating for outbound cursor and input writes.
//!
//! DESIGN
//! ======
//! Cursor samples pass a dual gate before they leave the client: at least
//! 33ms since the last sent sample (about 30 writes/s) AND more than one
//! percentage point of movement on some axis. Together these bound both the
//! write rate and the volume of jitter-only updates.
//!
//! Text input has no throttle. Typing produces far fewer events than pointer
//! movement, so every change is sent immediately.
//!
//! Both trackers stamp a per-writer `seq` starting at 1 so the server and
//! other clients can reject reordered stale writes.

#[cfg(test)]
#[path = "broadcast_test.rs"]
mod broadcast_test;

/// Minimum spacing between two sent cursor samples.
pub const CURSOR_MIN_INTERVAL_MS: f64 = 33.0;

/// Minimum movement, in percentage points, on at least one axis.
pub const CURSOR_MIN_DELTA_PCT: f64 = 1.0;

// =============================================================================
// CONTAINER GEOMETRY
// =============================================================================

/// Bounding box of the shared exercise container, in client pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContainerRect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl ContainerRect {
    /// Convert a pointer position to container percentages.
    ///
    /// Returns `None` when the pointer is outside the container or the
    /// container has no area.
    #[must_use]
    pub fn to_percent(&self, client_x: f64, client_y: f64) -> Option<(f64, f64)> {
        if self.width <= 0.0 || self.height <= 0.0 {
            return None;
        }
        let x = (client_x - self.left) / self.width * 100.0;
        let y = (client_y - self.top) / self.height * 100.0;
        in_bounds(x, y).then_some((x, y))
    }
}

fn in_bounds(x: f64, y: f64) -> bool {
    (0.0..=100.0).contains(&x) && (0.0..=100.0).contains(&y)
}

// =============================================================================
// CURSOR THROTTLE
// =============================================================================

/// A cursor position cleared for sending.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CursorSample {
    pub x: f64,
    pub y: f64,
    pub seq: u64,
}

#[derive(Debug, Clone, Copy)]
struct LastSent {
    at_ms: f64,
    x: f64,
    y: f64,
}

/// Time + distance gate for outbound cursor writes.
#[derive(Debug, Clone)]
pub struct CursorThrottle {
    min_interval_ms: f64,
    min_delta_pct: f64,
    last: Option<LastSent>,
    next_seq: u64,
}

impl CursorThrottle {
    #[must_use]
    pub fn new() -> Self {
        Self::with_limits(CURSOR_MIN_INTERVAL_MS, CURSOR_MIN_DELTA_PCT)
    }

    #[must_use]
    pub fn with_limits(min_interval_ms: f64, min_delta_pct: f64) -> Self {
        Self { min_interval_ms, min_delta_pct, last: None, next_seq: 1 }
    }

    /// Offer a raw pointer event. See [`CursorThrottle::offer`].
    pub fn offer_pointer(&mut self, now_ms: f64, rect: &ContainerRect, client_x: f64, client_y: f64) -> Option<CursorSample> {
        let (x, y) = rect.to_percent(client_x, client_y)?;
        self.offer(now_ms, x, y)
    }

    /// Offer a position in container percentages.
    ///
    /// Returns the sample to send, or `None` if it is out of bounds or fails
    /// either gate. The first in-bounds sample is always sent.
    pub fn offer(&mut self, now_ms: f64, x: f64, y: f64) -> Option<CursorSample> {
        if !x.is_finite() || !y.is_finite() || !in_bounds(x, y) {
            return None;
        }

        if let Some(last) = self.last {
            if now_ms - last.at_ms < self.min_interval_ms {
                return None;
            }
            let moved = (x - last.x).abs() > self.min_delta_pct || (y - last.y).abs() > self.min_delta_pct;
            if !moved {
                return None;
            }
        }

        self.last = Some(LastSent { at_ms: now_ms, x, y });
        let seq = self.next_seq;
        self.next_seq += 1;
        Some(CursorSample { x, y, seq })
    }

    /// Forget the last sent position so the next in-bounds sample goes out.
    ///
    /// The sequence counter keeps counting; the server still holds entries
    /// stamped with earlier values.
    pub fn reset(&mut self) {
        self.last = None;
    }
}

impl Default for CursorThrottle {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// INPUT TRACKER
// =============================================================================

/// An input change cleared for sending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputSample {
    pub value: String,
    pub item_index: u32,
    pub seq: u64,
}

/// Emits one write per change of `(value, item_index)`.
#[derive(Debug, Clone)]
pub struct InputTracker {
    last: Option<(String, u32)>,
    next_seq: u64,
}

impl InputTracker {
    #[must_use]
    pub fn new() -> Self {
        Self { last: None, next_seq: 1 }
    }

    /// Record the current local value. Returns a sample when it changed.
    pub fn change(&mut self, value: &str, item_index: u32) -> Option<InputSample> {
        if let Some((last_value, last_item)) = &self.last {
            if last_value == value && *last_item == item_index {
                return None;
            }
        }

        self.last = Some((value.to_owned(), item_index));
        let seq = self.next_seq;
        self.next_seq += 1;
        Some(InputSample { value: value.to_owned(), item_index, seq })
    }
}

impl Default for InputTracker {
    fn default() -> Self {
        Self::new()
    }
}
