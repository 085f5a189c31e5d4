//! Periodic window snapshot to the shared cache for warm restarts.

use anyhow::Result;
use log::info;

use crate::db::RedisStore;
use crate::window::WindowEngine;

pub async fn run(engine: &WindowEngine, redis: &RedisStore) -> Result<()> {
    let data = engine.snapshot();
    let bytes = data.len();
    redis.store_snapshot(&data).await?;

    info!("Persisted window snapshot ({bytes} bytes)");
    Ok(())
}
