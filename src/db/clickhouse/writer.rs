//! Channel-fed batch writer for raw swap rows.
//!
//! A bounded queue feeds a single drainer task that accumulates rows and
//! flushes when the batch is full or the flush interval elapses. Enqueueing
//! blocks while the queue is full; that backpressure is the only place the
//! pipeline gates throughput. A failed insert is retried with doubling
//! backoff; an exhausted batch is dropped, logged at error and reported
//! through the alert hook.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::WriterSettings;
use crate::db::clickhouse::SwapStore;
use crate::db::models::RawSwapRow;

/// Invoked when a batch is dropped after retry exhaustion.
pub type AlertHook = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WriterError {
    #[error("raw swap writer is closed")]
    Closed,
    #[error("raw swap writer failed to drain before the deadline")]
    ShutdownTimeout,
}

pub struct RawSwapWriter {
    sender: Mutex<Option<mpsc::Sender<RawSwapRow>>>,
    drainer: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl RawSwapWriter {
    /// Starts the drainer task and returns the enqueue handle.
    pub fn spawn(
        store: Arc<dyn SwapStore>,
        settings: WriterSettings,
        alert: Option<AlertHook>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(settings.queue_capacity.max(1));

        let drainer = tokio::spawn(drain_loop(store, receiver, settings, alert));

        Self {
            sender: Mutex::new(Some(sender)),
            drainer: Mutex::new(Some(drainer)),
            closed: AtomicBool::new(false),
        }
    }

    /// Queues one row, waiting while the queue is full.
    pub async fn enqueue(&self, row: RawSwapRow) -> Result<(), WriterError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(WriterError::Closed);
        }

        let sender = self.sender.lock().clone();
        match sender {
            Some(sender) => sender.send(row).await.map_err(|_| WriterError::Closed),
            None => Err(WriterError::Closed),
        }
    }

    /// Stops accepting rows and drains the queue within `deadline`.
    pub async fn close(&self, deadline: Duration) -> Result<(), WriterError> {
        self.closed.store(true, Ordering::Release);
        self.sender.lock().take();

        let drainer = self.drainer.lock().take();
        let Some(drainer) = drainer else {
            return Ok(());
        };

        match tokio::time::timeout(deadline, drainer).await {
            Ok(_) => {
                info!("Raw swap writer drained and stopped");
                Ok(())
            },
            Err(_) => Err(WriterError::ShutdownTimeout),
        }
    }
}

async fn drain_loop(
    store: Arc<dyn SwapStore>,
    mut receiver: mpsc::Receiver<RawSwapRow>,
    settings: WriterSettings,
    alert: Option<AlertHook>,
) {
    let mut batch: Vec<RawSwapRow> = Vec::with_capacity(settings.batch_max_rows);

    let period = settings.batch_max_interval;
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            msg = receiver.recv() => match msg {
                Some(row) => {
                    batch.push(row);
                    if batch.len() >= settings.batch_max_rows {
                        flush(store.as_ref(), &mut batch, &settings, alert.as_ref()).await;
                        ticker.reset();
                    }
                }
                // All senders dropped: final flush, then stop.
                None => {
                    flush(store.as_ref(), &mut batch, &settings, alert.as_ref()).await;
                    break;
                }
            },
            _ = ticker.tick() => {
                flush(store.as_ref(), &mut batch, &settings, alert.as_ref()).await;
            }
        }
    }
}

/// Inserts the accumulated batch, retrying with doubling backoff. The batch
/// is cleared afterwards whether it landed or was dropped.
async fn flush(
    store: &dyn SwapStore,
    batch: &mut Vec<RawSwapRow>,
    settings: &WriterSettings,
    alert: Option<&AlertHook>,
) {
    if batch.is_empty() {
        return;
    }

    let mut backoff = settings.retry_backoff;
    let mut last_err = None;

    for attempt in 0..=settings.max_retries {
        match store.insert_batch(batch).await {
            Ok(()) => {
                batch.clear();
                return;
            },
            Err(e) => {
                if attempt < settings.max_retries {
                    warn!(
                        "Batch insert failed (attempt {}/{}), retrying in {:?}: {:#}",
                        attempt + 1,
                        settings.max_retries + 1,
                        backoff,
                        e
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                last_err = Some(e);
            },
        }
    }

    let msg = format!(
        "Dropping batch of {} rows after {} attempts: {:#}",
        batch.len(),
        settings.max_retries + 1,
        last_err.expect("retry loop always records an error")
    );
    error!("{msg}");
    if let Some(alert) = alert {
        alert(&msg);
    }
    batch.clear();
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use time::OffsetDateTime;

    use super::*;

    struct MockStore {
        batches: Mutex<Vec<Vec<RawSwapRow>>>,
        fail_next: AtomicUsize,
    }

    impl MockStore {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                batches: Mutex::new(Vec::new()),
                fail_next: AtomicUsize::new(0),
            })
        }

        fn failing(times: usize) -> Arc<Self> {
            let store = Self::new();
            store.fail_next.store(times, Ordering::SeqCst);
            store
        }

        fn batch_sizes(&self) -> Vec<usize> {
            self.batches.lock().iter().map(Vec::len).collect()
        }

        fn total_rows(&self) -> usize {
            self.batches.lock().iter().map(Vec::len).sum()
        }
    }

    #[async_trait]
    impl SwapStore for MockStore {
        async fn insert_batch(&self, rows: &[RawSwapRow]) -> anyhow::Result<()> {
            let remaining = self.fail_next.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_next.store(remaining - 1, Ordering::SeqCst);
                anyhow::bail!("store unavailable");
            }

            self.batches.lock().push(rows.to_vec());
            Ok(())
        }
    }

    fn row(event_id: &str) -> RawSwapRow {
        RawSwapRow {
            event_time: OffsetDateTime::UNIX_EPOCH,
            chain_id: 1,
            tx_hash: "0xabc".to_string(),
            log_index: 0,
            event_id: event_id.to_string(),
            token_address: "0xa".to_string(),
            token_symbol: "USDC".to_string(),
            pool_address: "0xp".to_string(),
            side: "buy".to_string(),
            amount_token: "1".to_string(),
            amount_usd: "1.00".to_string(),
            block_number: 1,
            removed: 0,
            schema_version: 1,
        }
    }

    fn settings(batch_max_rows: usize, max_retries: u32) -> WriterSettings {
        WriterSettings {
            batch_max_rows,
            batch_max_interval: Duration::from_millis(30),
            max_retries,
            retry_backoff: Duration::from_millis(5),
            queue_capacity: 64,
        }
    }

    #[tokio::test]
    async fn size_trigger_flushes_full_batch() {
        let store = MockStore::new();
        let writer = RawSwapWriter::spawn(store.clone(), settings(2, 0), None);

        writer.enqueue(row("1")).await.unwrap();
        writer.enqueue(row("2")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(15)).await;
        assert_eq!(store.batch_sizes(), vec![2]);

        writer.close(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn interval_trigger_flushes_partial_batch() {
        let store = MockStore::new();
        let writer = RawSwapWriter::spawn(store.clone(), settings(100, 0), None);

        writer.enqueue(row("1")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(store.batch_sizes(), vec![1]);

        writer.close(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn insert_is_retried_until_success() {
        let store = MockStore::failing(2);
        let writer = RawSwapWriter::spawn(store.clone(), settings(1, 3), None);

        writer.enqueue(row("1")).await.unwrap();
        writer.close(Duration::from_secs(1)).await.unwrap();

        assert_eq!(store.total_rows(), 1);
    }

    #[tokio::test]
    async fn exhausted_batch_is_dropped_and_alerted() {
        let store = MockStore::failing(10);
        let alerts = Arc::new(Mutex::new(Vec::<String>::new()));
        let alerts_ref = alerts.clone();
        let hook: AlertHook = Arc::new(move |msg: &str| alerts_ref.lock().push(msg.to_string()));

        let writer = RawSwapWriter::spawn(store.clone(), settings(1, 1), Some(hook));

        writer.enqueue(row("1")).await.unwrap();
        // Let the failed batch exhaust its two attempts.
        tokio::time::sleep(Duration::from_millis(100)).await;

        // The writer keeps going: the next row lands once the store recovers.
        store.fail_next.store(0, Ordering::SeqCst);
        writer.enqueue(row("2")).await.unwrap();
        writer.close(Duration::from_secs(1)).await.unwrap();

        assert_eq!(store.total_rows(), 1);
        assert_eq!(alerts.lock().len(), 1);
    }

    #[tokio::test]
    async fn close_drains_queued_rows() {
        let store = MockStore::new();
        let writer = RawSwapWriter::spawn(store.clone(), settings(100, 0), None);

        for i in 0..10 {
            writer.enqueue(row(&i.to_string())).await.unwrap();
        }
        writer.close(Duration::from_secs(1)).await.unwrap();

        assert_eq!(store.total_rows(), 10);
    }

    #[tokio::test]
    async fn enqueue_after_close_returns_closed() {
        let store = MockStore::new();
        let writer = RawSwapWriter::spawn(store.clone(), settings(10, 0), None);

        writer.close(Duration::from_secs(1)).await.unwrap();
        assert_eq!(writer.enqueue(row("1")).await, Err(WriterError::Closed));
    }

    #[tokio::test]
    async fn slow_store_hits_shutdown_deadline() {
        struct SlowStore;

        #[async_trait]
        impl SwapStore for SlowStore {
            async fn insert_batch(&self, _rows: &[RawSwapRow]) -> anyhow::Result<()> {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            }
        }

        let writer = RawSwapWriter::spawn(Arc::new(SlowStore), settings(1, 0), None);
        writer.enqueue(row("1")).await.unwrap();

        assert_eq!(
            writer.close(Duration::from_millis(50)).await,
            Err(WriterError::ShutdownTimeout)
        );
    }
}
