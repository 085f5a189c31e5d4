//! Broker consumer for the raw swap topic.
//!
//! Offsets are committed only after the orchestrator acknowledges an event,
//! so a crash replays uncommitted events and the dedupe layer absorbs the
//! replay. Events keyed by event id land on a stable partition, which keeps
//! per-token processing in delivery order.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use log::{error, info, warn};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::{Message, Offset};
use tokio_util::sync::CancellationToken;

use crate::config::IngestSettings;
use crate::db::WriterError;
use crate::domain::{make_event_id, parse_event_id, SwapEvent};
use crate::service::AggregatorService;

/// Pause before re-fetching an event whose processing failed retryably.
const RETRY_PAUSE: Duration = Duration::from_secs(1);

pub struct SwapConsumer {
    consumer: StreamConsumer,
    service: Arc<AggregatorService>,
    topic: String,
}

impl SwapConsumer {
    pub fn new(settings: &IngestSettings, service: Arc<AggregatorService>) -> anyhow::Result<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", settings.brokers.join(","))
            .set("group.id", &settings.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", &settings.start)
            .set(
                "session.timeout.ms",
                settings.session_timeout.as_millis().to_string(),
            )
            .set(
                "max.poll.interval.ms",
                settings.rebalance_timeout.as_millis().to_string(),
            )
            .set("fetch.message.max.bytes", settings.max_bytes.to_string())
            .create()
            .context("failed to create broker consumer")?;

        consumer
            .subscribe(&[settings.topic.as_str()])
            .with_context(|| format!("failed to subscribe to {}", settings.topic))?;

        info!(
            "Swap consumer subscribed to {} (group {})",
            settings.topic, settings.group_id
        );

        Ok(Self {
            consumer,
            service,
            topic: settings.topic.clone(),
        })
    }

    /// Consumes until cancelled or the writer shuts down underneath us.
    pub async fn run(&self, cancellation_token: CancellationToken) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                biased;

                _ = cancellation_token.cancelled() => {
                    info!("Swap consumer received cancellation signal");
                    return Ok(());
                }

                msg = self.consumer.recv() => {
                    let msg = match msg {
                        Ok(msg) => msg,
                        Err(e) => {
                            error!("Broker receive error: {e}");
                            tokio::time::sleep(RETRY_PAUSE).await;
                            continue;
                        },
                    };

                    let Some(payload) = msg.payload() else {
                        warn!(
                            "Empty payload at {}[{}]@{}, skipping",
                            self.topic, msg.partition(), msg.offset()
                        );
                        self.commit(&msg)?;
                        continue;
                    };

                    let mut ev: SwapEvent = match serde_json::from_slice(payload) {
                        Ok(ev) => ev,
                        Err(e) => {
                            // A malformed record never becomes parseable; drop it.
                            warn!(
                                "Dropping undecodable record at {}[{}]@{}: {e}",
                                self.topic, msg.partition(), msg.offset()
                            );
                            self.commit(&msg)?;
                            continue;
                        },
                    };

                    // Dedupe keys must be uniform: re-canonicalize the id
                    // (lowercase tx hash), deriving it from the event fields
                    // when the producer omitted it or sent garbage.
                    ev.event_id = match parse_event_id(&ev.event_id) {
                        Ok(id) => make_event_id(id.chain_id, &id.tx_hash, id.log_index),
                        Err(_) => make_event_id(ev.chain_id, &ev.tx_hash, ev.log_index),
                    };

                    match self.service.process_swap_event(&ev).await {
                        Ok(()) => self.commit(&msg)?,
                        Err(e) => {
                            if e.downcast_ref::<WriterError>() == Some(&WriterError::Closed) {
                                info!("Writer closed, halting consumer");
                                return Err(e);
                            }

                            // Retryable (e.g. cache unavailable): hold the
                            // offset and re-fetch the same record.
                            error!(
                                "Failed to process event {}, will retry: {e:#}",
                                ev.event_id
                            );
                            self.consumer.seek(
                                msg.topic(),
                                msg.partition(),
                                Offset::Offset(msg.offset()),
                                Duration::from_secs(5),
                            )?;
                            tokio::time::sleep(RETRY_PAUSE).await;
                        },
                    }
                }
            }
        }
    }

    fn commit(&self, msg: &rdkafka::message::BorrowedMessage<'_>) -> anyhow::Result<()> {
        self.consumer
            .commit_message(msg, CommitMode::Async)
            .context("failed to commit offset")
    }
}
