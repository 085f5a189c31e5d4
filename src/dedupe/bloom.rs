//! RedisBloom prefilter in front of the authoritative dedupe set.
//!
//! A cheap probabilistic "seen / not seen" check before the SET NX round
//! trip. "Definitely absent" falls through to the authoritative check;
//! "probably present" short-circuits to duplicate, at the false-positive
//! rate the filter was reserved with.

use anyhow::Context;
use redis::aio::MultiplexedConnection;

use crate::config::BloomSettings;

pub struct Bloom {
    conn: MultiplexedConnection,
    key: String,
    capacity: i64,
    error_rate: f64,
}

impl Bloom {
    pub fn new(settings: &BloomSettings, conn: MultiplexedConnection) -> Self {
        Self {
            conn,
            key: settings.key.clone(),
            capacity: settings.capacity,
            error_rate: settings.error_rate,
        }
    }

    /// Creates the filter if it does not exist yet. Safe to call repeatedly.
    ///
    /// Fails when the RedisBloom module is not loaded; the caller decides
    /// whether to run without a prefilter.
    pub async fn ensure(&self) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();

        let exists: i64 = redis::cmd("EXISTS")
            .arg(&self.key)
            .query_async(&mut conn)
            .await
            .context("failed to check bloom filter key")?;
        if exists > 0 {
            return Ok(());
        }

        redis::cmd("BF.RESERVE")
            .arg(&self.key)
            .arg(self.error_rate)
            .arg(self.capacity)
            .query_async::<()>(&mut conn)
            .await
            .context("BF.RESERVE failed")?;

        Ok(())
    }

    /// Adds an item. Returns `true` when the item was definitely absent.
    pub async fn add(&self, item: &str) -> anyhow::Result<bool> {
        let mut conn = self.conn.clone();
        let added: i64 = redis::cmd("BF.ADD")
            .arg(&self.key)
            .arg(item)
            .query_async(&mut conn)
            .await
            .context("BF.ADD failed")?;
        Ok(added == 1)
    }

    /// Membership query. `true` means the item is probably present.
    pub async fn exists(&self, item: &str) -> anyhow::Result<bool> {
        let mut conn = self.conn.clone();
        let present: i64 = redis::cmd("BF.EXISTS")
            .arg(&self.key)
            .arg(item)
            .query_async(&mut conn)
            .await
            .context("BF.EXISTS failed")?;
        Ok(present == 1)
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}
