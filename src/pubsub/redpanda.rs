//! Redpanda (Kafka-compatible) patch broadcaster.
//!
//! Publishes per-token stats patches for downstream subscribers (WebSocket
//! fan-out, other instances). Fire-and-forget semantics so the aggregation
//! path never blocks on the bus.

use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use log::info;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};

use crate::config::PubSubSettings;
use crate::domain::TokenStatsPatch;
use crate::pubsub::Broadcaster;

pub struct RedpandaBroadcaster {
    producer: FutureProducer,
    topic_prefix: String,
}

impl RedpandaBroadcaster {
    /// Creates the broadcaster. Returns None when publishing is disabled.
    pub fn new(settings: &PubSubSettings) -> anyhow::Result<Option<Self>> {
        if !settings.enabled {
            info!("Patch broadcasting is disabled");
            return Ok(None);
        }

        info!("Connecting to pubsub brokers: {}", settings.brokers);

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &settings.brokers)
            .set("message.timeout.ms", "5000")
            .set("queue.buffering.max.messages", "100000")
            .set("linger.ms", "5")
            .create()
            .context("failed to create pubsub producer")?;

        info!(
            "Patch broadcaster initialized with topic prefix: {}",
            settings.broadcast_prefix
        );

        Ok(Some(Self {
            producer,
            topic_prefix: settings.broadcast_prefix.clone(),
        }))
    }

    /// `token:<symbol>` becomes `<prefix>.token.<symbol>` on the bus.
    fn topic_for(&self, patch: &TokenStatsPatch) -> String {
        format!("{}.{}", self.topic_prefix, patch.topic.replace(':', "."))
    }

    /// Probes the brokers with a short metadata request.
    fn probe_brokers(&self) -> bool {
        self.producer
            .client()
            .fetch_metadata(None, Duration::from_secs(1))
            .is_ok()
    }

    /// Flushes any buffered messages; called on shutdown.
    pub fn flush(&self) {
        self.producer.flush(Duration::from_secs(5)).ok();
    }
}

#[async_trait]
impl Broadcaster for RedpandaBroadcaster {
    async fn publish(&self, patch: &TokenStatsPatch) -> anyhow::Result<()> {
        let topic = self.topic_for(patch);
        let payload =
            serde_json::to_string(patch).context("failed to serialize stats patch")?;
        let key = patch.token.state_key();

        let record = FutureRecord::to(&topic).key(&key).payload(&payload);

        self.producer
            .send(record, Duration::from_millis(100))
            .await
            .map_err(|(e, _)| anyhow!("failed to send patch to {topic}: {e}"))?;

        Ok(())
    }

    fn ready(&self) -> bool {
        self.probe_brokers()
    }
}

impl Drop for RedpandaBroadcaster {
    fn drop(&mut self) {
        self.flush();
    }
}
