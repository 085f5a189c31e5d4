//! Scheduler for the engine's periodic tasks:
//! - the window tick, aligned to wallclock minute boundaries
//! - the optional periodic snapshot (shutdown snapshot is handled by main)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use log::{error, info};
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;

use crate::db::RedisStore;
use crate::window::WindowEngine;

use super::jobs;

pub struct CronScheduler {
    engine: Arc<WindowEngine>,
    redis: Arc<RedisStore>,
    snapshot_interval: Option<Duration>,
}

impl CronScheduler {
    pub fn new(
        engine: Arc<WindowEngine>,
        redis: Arc<RedisStore>,
        snapshot_interval: Option<Duration>,
    ) -> Self {
        Self {
            engine,
            redis,
            snapshot_interval,
        }
    }

    /// Starts the scheduler and runs until cancellation.
    pub async fn run(&self, cancellation_token: CancellationToken) -> Result<()> {
        let mut scheduler = JobScheduler::new().await?;

        self.register_tick_job(&scheduler).await?;
        self.register_snapshot_job(&scheduler).await?;

        scheduler.start().await?;
        info!("Cron scheduler started");

        cancellation_token.cancelled().await;
        info!("Cron scheduler shutting down...");

        scheduler.shutdown().await?;
        Ok(())
    }

    /// The tick must land on minute boundaries so the slot it clears is
    /// exactly the one that wrapped around the ring.
    async fn register_tick_job(&self, scheduler: &JobScheduler) -> Result<()> {
        let engine = self.engine.clone();

        let job = Job::new_async("0 * * * * *", move |_uuid, _lock| {
            let engine = engine.clone();
            Box::pin(async move {
                jobs::tick::run(&engine);
            })
        })?;

        scheduler.add(job).await?;
        info!("Registered window tick job (every minute, aligned)");
        Ok(())
    }

    async fn register_snapshot_job(&self, scheduler: &JobScheduler) -> Result<()> {
        let Some(interval) = self.snapshot_interval else {
            return Ok(());
        };

        let engine = self.engine.clone();
        let redis = self.redis.clone();

        let job = Job::new_repeated_async(interval, move |_uuid, _lock| {
            let engine = engine.clone();
            let redis = redis.clone();
            Box::pin(async move {
                if let Err(e) = jobs::snapshot::run(&engine, &redis).await {
                    error!("Failed to persist window snapshot: {e:#}");
                }
            })
        })?;

        scheduler.add(job).await?;
        info!("Registered snapshot job (every {interval:?})");
        Ok(())
    }
}
