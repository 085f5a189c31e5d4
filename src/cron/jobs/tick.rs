//! Minute tick: advances the watermark and expires the slot that wrapped
//! around the 24-hour ring.

use std::time::Instant;

use log::debug;
use time::OffsetDateTime;

use crate::window::WindowEngine;

pub fn run(engine: &WindowEngine) {
    let started = Instant::now();
    engine.tick(OffsetDateTime::now_utc());

    // Tick holds the engine write lock for its whole pass; watch this if
    // token cardinality grows.
    debug!(
        "Window tick completed in {:?} ({} tokens)",
        started.elapsed(),
        engine.token_count()
    );
}
