//! Shared cache connection: dedupe keys, bloom filter, window snapshots.

use anyhow::Context;
use log::info;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;

use crate::config::RedisSettings;

pub struct RedisStore {
    conn: MultiplexedConnection,
    prefix: String,
}

impl RedisStore {
    pub async fn connect(settings: &RedisSettings) -> anyhow::Result<Self> {
        info!("Connecting to Redis at {}", settings.url);

        let client =
            redis::Client::open(settings.url.as_str()).context("invalid redis url")?;
        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .context("failed to connect to redis")?;

        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .context("redis ping failed")?;

        info!("Successfully connected to Redis");

        Ok(Self {
            conn,
            prefix: settings.prefix.clone(),
        })
    }

    /// A cheap clone of the multiplexed connection for other components.
    pub fn connection(&self) -> MultiplexedConnection {
        self.conn.clone()
    }

    pub async fn ping(&self) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .context("redis ping failed")?;
        Ok(())
    }

    fn snapshot_key(&self) -> String {
        format!("{}:window:snapshot", self.prefix)
    }

    /// Loads the persisted window snapshot, if any.
    pub async fn load_snapshot(&self) -> anyhow::Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let data: Option<Vec<u8>> = conn
            .get(self.snapshot_key())
            .await
            .context("failed to load window snapshot")?;
        Ok(data)
    }

    /// Persists the window snapshot for the next warm start.
    pub async fn store_snapshot(&self, data: &[u8]) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(self.snapshot_key(), data)
            .await
            .context("failed to store window snapshot")?;
        Ok(())
    }
}
