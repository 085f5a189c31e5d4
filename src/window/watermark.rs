//! Scalar clock bounding acceptable event lateness.

use std::time::Duration;

use time::{OffsetDateTime, UtcOffset};

/// Monotonic lower bound on acceptable event time: `max(observed now - grace)`.
///
/// Lateness is a global property of the stream clock, not a per-token one, so
/// one watermark serves the whole engine.
#[derive(Debug, Clone, Copy)]
pub struct Watermark {
    grace: Duration,
    current: OffsetDateTime,
    initialized: bool,
}

impl Watermark {
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            current: OffsetDateTime::UNIX_EPOCH,
            initialized: false,
        }
    }

    pub fn advance(&mut self, now: OffsetDateTime) {
        let candidate = now.to_offset(UtcOffset::UTC) - self.grace;
        if !self.initialized {
            self.current = candidate;
            self.initialized = true;
            return;
        }

        if candidate > self.current {
            self.current = candidate;
        }
    }

    /// Before the first advance every event is accepted.
    pub fn is_late(&self, t: OffsetDateTime) -> bool {
        self.initialized && t.to_offset(UtcOffset::UTC) < self.current
    }

    pub fn current(&self) -> Option<OffsetDateTime> {
        self.initialized.then_some(self.current)
    }

    /// Restores a previously persisted watermark position.
    pub fn restore(&mut self, current: OffsetDateTime) {
        self.current = current;
        self.initialized = true;
    }
}
