//! The per-event orchestration pipeline:
//! dedup → window apply → broadcast → persist → mark seen.

use std::sync::Arc;

use anyhow::Context;
use log::{debug, error, warn};

use crate::db::{RawSwapRow, RawSwapWriter, SwapStore};
use crate::dedupe::Deduper;
use crate::domain::{SwapEvent, TokenKey, Windows};
use crate::pubsub::Broadcaster;
use crate::window::{ApplyError, WindowEngine};

/// The single orchestration point for swap events. Consumers, CLI tools and
/// the read path all go through here.
pub struct AggregatorService {
    engine: Arc<WindowEngine>,
    deduper: Arc<dyn Deduper>,
    broadcaster: Option<Arc<dyn Broadcaster>>,
    writer: Arc<RawSwapWriter>,
    store: Arc<dyn SwapStore>,
}

impl AggregatorService {
    pub fn new(
        engine: Arc<WindowEngine>,
        deduper: Arc<dyn Deduper>,
        broadcaster: Option<Arc<dyn Broadcaster>>,
        writer: Arc<RawSwapWriter>,
        store: Arc<dyn SwapStore>,
    ) -> Self {
        Self {
            engine,
            deduper,
            broadcaster,
            writer,
            store,
        }
    }

    /// Processes one swap event to a terminal state.
    ///
    /// Returns Ok for processed events and for terminal drops (duplicate,
    /// late, unparseable). Returns an error only when the event must be
    /// retried (cache unavailable) or the pipeline is shutting down
    /// (`WriterError::Closed`); the consumer then leaves the offset
    /// uncommitted. A second apply of the same event would double-count,
    /// which is why the duplicate check runs before apply.
    pub async fn process_swap_event(&self, ev: &SwapEvent) -> anyhow::Result<()> {
        let is_dup = self
            .deduper
            .is_duplicate(&ev.event_id)
            .await
            .with_context(|| format!("dedup check failed for {}", ev.event_id))?;

        if is_dup {
            debug!("Duplicate event ignored: {}", ev.event_id);
            return Ok(());
        }

        let patches = match self.engine.apply(ev) {
            Ok(patches) => patches,
            Err(ApplyError::TooLate) => {
                debug!("Event too late, skipping: {} (ts={})", ev.event_id, ev.event_time);
                return Ok(());
            },
            Err(e @ ApplyError::InvalidAmount(_)) => {
                // Retrying cannot fix a malformed amount.
                warn!("Dropping unparseable event {}: {e}", ev.event_id);
                return Ok(());
            },
        };

        if let Some(broadcaster) = &self.broadcaster {
            for patch in &patches {
                if let Err(e) = broadcaster.publish(patch).await {
                    warn!("Failed to broadcast patch for {}: {e:#}", patch.topic);
                }
            }
        }

        self.writer
            .enqueue(RawSwapRow::from(ev))
            .await
            .with_context(|| format!("persist enqueue failed for {}", ev.event_id))?;

        // Best-effort: an unmarked event is replayable, and replay is
        // absorbed by this same duplicate check.
        if let Err(e) = self.deduper.mark_seen(&ev.event_id).await {
            error!("Failed to mark event {} as seen: {e:#}", ev.event_id);
        }

        debug!(
            "Event processed: {} (token={}, vol={})",
            ev.event_id, ev.token_symbol, ev.amount_usd
        );

        Ok(())
    }

    /// Current rolling windows of a token, if it has live state.
    pub fn get_token_windows(&self, key: &TokenKey) -> Option<Windows> {
        self.engine.get_windows(key)
    }

    /// All tokens with active statistics.
    pub fn list_tokens(&self) -> Vec<TokenKey> {
        self.engine.list_tokens()
    }

    /// Verifies the cache, the columnar store and the bus are reachable.
    pub async fn check_dependencies(&self) -> anyhow::Result<()> {
        let mut failures = Vec::new();

        if let Err(e) = self.deduper.health().await {
            failures.push(format!("cache: {e:#}"));
        }

        if let Err(e) = self.store.health().await {
            failures.push(format!("columnar store: {e:#}"));
        }

        if let Some(broadcaster) = &self.broadcaster {
            if !broadcaster.ready() {
                failures.push("bus: connection not ready".to_string());
            }
        }

        if !failures.is_empty() {
            anyhow::bail!("dependency check failed: {}", failures.join("; "));
        }

        debug!("All dependency checks passed");
        Ok(())
    }
}
