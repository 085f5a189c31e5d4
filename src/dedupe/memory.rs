//! In-process deduper for single-instance runs and tests.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::debug;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::dedupe::Deduper;

pub struct MemoryDeduper {
    ttl: Duration,
    items: Mutex<FxHashMap<String, Instant>>,
}

impl MemoryDeduper {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            items: Mutex::new(FxHashMap::default()),
        }
    }

    /// Spawns a background sweep that removes expired ids every `every`.
    pub fn spawn_janitor(
        self: &Arc<Self>,
        every: Duration,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        let deduper = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let now = Instant::now();
                        let mut items = deduper.items.lock();
                        let before = items.len();
                        items.retain(|_, expires_at| *expires_at > now);
                        let swept = before - items.len();
                        if swept > 0 {
                            debug!("Dedupe janitor removed {swept} expired ids");
                        }
                    }
                }
            }
        })
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

#[async_trait]
impl Deduper for MemoryDeduper {
    async fn is_duplicate(&self, event_id: &str) -> anyhow::Result<bool> {
        let items = self.items.lock();
        Ok(items
            .get(event_id)
            .is_some_and(|expires_at| *expires_at > Instant::now()))
    }

    async fn mark_seen(&self, event_id: &str) -> anyhow::Result<bool> {
        let now = Instant::now();
        let mut items = self.items.lock();

        if items.get(event_id).is_some_and(|expires_at| *expires_at > now) {
            return Ok(false);
        }

        items.insert(event_id.to_string(), now + self.ttl);
        Ok(true)
    }

    async fn health(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
