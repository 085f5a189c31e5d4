//! Cluster-wide deduplication over Redis: SET NX with TTL, fronted by an
//! optional bloom prefilter.

use anyhow::Context;
use async_trait::async_trait;
use log::warn;
use redis::aio::MultiplexedConnection;

use crate::config::DedupeSettings;
use crate::dedupe::{Bloom, Deduper};

pub struct RedisDeduper {
    conn: MultiplexedConnection,
    prefix: String,
    ttl_secs: u64,
    bloom: Option<Bloom>,
}

impl RedisDeduper {
    pub fn new(
        settings: &DedupeSettings,
        conn: MultiplexedConnection,
        bloom: Option<Bloom>,
    ) -> Self {
        Self {
            conn,
            prefix: settings.prefix.clone(),
            ttl_secs: settings.ttl.as_secs().max(1),
            bloom,
        }
    }

    fn key(&self, event_id: &str) -> String {
        format!("{}{}", self.prefix, event_id)
    }

    /// Atomic set-if-absent with TTL. Returns `true` when the key was new.
    async fn set_nx(&self, event_id: &str) -> anyhow::Result<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.key(event_id))
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(self.ttl_secs)
            .query_async(&mut conn)
            .await
            .context("redis SET NX failed")?;

        // SET NX replies OK on a fresh key and nil when it already exists.
        Ok(reply.is_some())
    }
}

#[async_trait]
impl Deduper for RedisDeduper {
    async fn is_duplicate(&self, event_id: &str) -> anyhow::Result<bool> {
        if let Some(bloom) = &self.bloom {
            return bloom.exists(event_id).await;
        }

        let mut conn = self.conn.clone();
        let exists: i64 = redis::cmd("EXISTS")
            .arg(self.key(event_id))
            .query_async(&mut conn)
            .await
            .context("redis EXISTS failed")?;
        Ok(exists > 0)
    }

    async fn mark_seen(&self, event_id: &str) -> anyhow::Result<bool> {
        // The bloom saves a SET NX round trip on the duplicate-heavy path.
        if let Some(bloom) = &self.bloom {
            if bloom.exists(event_id).await? {
                return Ok(false);
            }
        }

        let new = self.set_nx(event_id).await?;

        if new {
            if let Some(bloom) = &self.bloom {
                if let Err(e) = bloom.add(event_id).await {
                    warn!("Failed to add {event_id} to bloom prefilter: {e:#}");
                }
            }
        }

        Ok(new)
    }

    async fn health(&self) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .context("redis ping failed")?;
        Ok(())
    }
}
