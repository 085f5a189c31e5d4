use anyhow::Context;
use async_trait::async_trait;
use clickhouse::Client;
use log::{info, warn};

use crate::config::ClickHouseSettings;
use crate::db::models::RawSwapRow;

/// Destination of the batched raw-swap inserts.
///
/// Abstracted so the writer's batching, retry and shutdown behaviour can be
/// exercised without a live server. A batch either lands entirely or not at
/// all.
#[async_trait]
pub trait SwapStore: Send + Sync {
    async fn insert_batch(&self, rows: &[RawSwapRow]) -> anyhow::Result<()>;

    async fn health(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

pub struct ClickhouseClient {
    pub client: Client,
}

impl ClickhouseClient {
    /// Connects and verifies the server answers a probe query, retrying per
    /// the configured attempt count and backoff. The store is often the last
    /// service to come up in a fresh deployment.
    pub async fn new(settings: &ClickHouseSettings) -> anyhow::Result<Self> {
        info!("Connecting to ClickHouse at {}", settings.url);

        let client = Client::default()
            .with_url(settings.url.clone())
            .with_user(settings.user.clone())
            .with_password(settings.password.clone())
            .with_database(settings.database.clone());

        let attempts = settings.connect_attempts.max(1);
        let mut backoff = settings.connect_backoff;

        for attempt in 1..=attempts {
            match client.query("SELECT 1").fetch_one::<u8>().await {
                Ok(_) => {
                    info!("ClickHouse is up (attempt {attempt}/{attempts})");
                    return Ok(Self { client });
                },
                Err(e) if attempt < attempts => {
                    warn!("ClickHouse probe failed, next try in {backoff:?}: {e}");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                },
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("ClickHouse unreachable after {attempts} attempts"));
                },
            }
        }

        unreachable!("connect loop either returns a client or an error");
    }

    /// Applies `schema/clickhouse.sql`. The driver rejects multi-statement
    /// queries, so the file is executed one statement at a time.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        let schema = tokio::fs::read_to_string("schema/clickhouse.sql")
            .await
            .context("Failed to read schema/clickhouse.sql")?;

        let mut applied = 0usize;
        for statement in schema.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            self.client
                .query(statement)
                .execute()
                .await
                .with_context(|| format!("Schema statement failed: {statement}"))?;
            applied += 1;
        }

        info!("Applied {applied} schema statements");
        Ok(())
    }

    pub async fn health_check(&self) -> anyhow::Result<()> {
        self.client
            .query("SELECT 1")
            .fetch_one::<u8>()
            .await
            .context("columnar store unreachable")?;
        Ok(())
    }
}

#[async_trait]
impl SwapStore for ClickhouseClient {
    async fn insert_batch(&self, rows: &[RawSwapRow]) -> anyhow::Result<()> {
        let mut insert = self
            .client
            .insert::<RawSwapRow>("raw_swaps")
            .context("failed to prepare raw_swaps insert")?;

        for row in rows {
            insert.write(row).await.context("failed to append row")?;
        }

        insert.end().await.context("failed to send batch")?;
        Ok(())
    }

    async fn health(&self) -> anyhow::Result<()> {
        self.health_check().await
    }
}
