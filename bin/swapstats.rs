use std::sync::Arc;

use anyhow::Context;
use jemallocator::Jemalloc;
use log::{error, info, warn, LevelFilter};
use simple_logger::SimpleLogger;
use tokio_util::sync::CancellationToken;

#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use swapstats::db::SwapStore;
use swapstats::dedupe::{Bloom, Deduper, RedisDeduper};
use swapstats::pubsub::Broadcaster;
use swapstats::{
    AggregatorService, ClickhouseClient, CronScheduler, RawSwapWriter, RedisStore,
    RedpandaBroadcaster, Settings, SwapConsumer, WindowEngine,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .env()
        .init()
        .unwrap();

    // Load configuration (path from CONFIG env var, default config.yaml)
    let settings = Arc::new(
        Settings::new().context("Failed to load configuration. Set CONFIG or provide config.yaml")?,
    );

    info!("Starting swapstats instance {}", settings.app.instance_id);

    // Stores
    let redis = Arc::new(
        RedisStore::connect(&settings.stores.redis)
            .await
            .context("Failed to initialize redis client")?,
    );

    let clickhouse = Arc::new(
        ClickhouseClient::new(&settings.stores.clickhouse)
            .await
            .context("Failed to initialize clickhouse client")?,
    );
    clickhouse.migrate().await?;

    // Batch writer for raw swap rows
    let writer = Arc::new(RawSwapWriter::spawn(
        clickhouse.clone() as Arc<dyn SwapStore>,
        settings.stores.clickhouse.writer.clone(),
        None,
    ));

    // Window engine, warm-started from the last snapshot when possible
    let engine = Arc::new(WindowEngine::new(&settings.window));
    match redis.load_snapshot().await {
        Ok(Some(data)) => {
            if let Err(e) = engine.restore(&data) {
                warn!("Invalid window snapshot, starting cold: {e}");
            }
        },
        Ok(None) => info!("No window snapshot found, starting cold"),
        Err(e) => warn!("Failed to load window snapshot, starting cold: {e:#}"),
    }

    // Dedupe: bloom prefilter (when the module is available) + SET NX set
    let bloom = if settings.dedupe.bloom.enabled {
        let bloom = Bloom::new(&settings.dedupe.bloom, redis.connection());
        match bloom.ensure().await {
            Ok(()) => Some(bloom),
            Err(e) => {
                warn!("Bloom prefilter unavailable, deduping without it: {e:#}");
                None
            },
        }
    } else {
        None
    };

    let deduper: Arc<dyn Deduper> = Arc::new(RedisDeduper::new(
        &settings.dedupe,
        redis.connection(),
        bloom,
    ));

    // Patch broadcaster (best-effort; None when disabled)
    let broadcaster = RedpandaBroadcaster::new(&settings.pubsub)?.map(Arc::new);

    let service = Arc::new(AggregatorService::new(
        engine.clone(),
        deduper,
        broadcaster
            .clone()
            .map(|b| b as Arc<dyn Broadcaster>),
        writer.clone(),
        clickhouse.clone() as Arc<dyn SwapStore>,
    ));

    service
        .check_dependencies()
        .await
        .context("Dependency check failed at startup")?;

    let cancellation_token = CancellationToken::new();

    // Cron scheduler: minute-aligned window tick + optional snapshots
    let cron_scheduler = CronScheduler::new(
        engine.clone(),
        redis.clone(),
        settings.app.snapshot_interval,
    );
    let cron_token = cancellation_token.child_token();
    let cron_handle = tokio::spawn(async move {
        if let Err(e) = cron_scheduler.run(cron_token).await {
            error!("Cron scheduler failed: {:#}", e);
        }
    });

    // Broker consumer
    let consumer = SwapConsumer::new(&settings.ingest, service.clone())
        .context("Failed to initialize swap consumer")?;
    let consumer_token = cancellation_token.child_token();
    let consumer_handle = tokio::spawn(async move {
        if let Err(e) = consumer.run(consumer_token).await {
            error!("Swap consumer stopped: {:#}", e);
        }
    });

    #[cfg(unix)]
    let mut sigterm_stream = {
        use tokio::signal::unix::{signal, SignalKind};
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?
    };

    info!("Aggregator running. Press Ctrl+C to stop.");

    #[cfg(unix)]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal (Ctrl+C), exiting gracefully...");
            },
            _ = sigterm_stream.recv() => {
                info!("Received SIGTERM, exiting gracefully...");
            },
        };
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal (Ctrl+C), exiting gracefully...");
    }

    // Stop intake first so the writer can drain a bounded backlog
    info!("Finishing all tasks...");
    cancellation_token.cancel();

    let _ = consumer_handle.await;
    let _ = cron_handle.await;

    info!("Draining raw swap writer...");
    writer
        .close(settings.app.shutdown_timeout)
        .await
        .context("Writer failed to drain before the shutdown deadline")?;

    // Snapshot on clean shutdown for the next warm start
    let data = engine.snapshot();
    if let Err(e) = redis.store_snapshot(&data).await {
        error!("Failed to persist shutdown snapshot: {e:#}");
    } else {
        info!("Persisted shutdown snapshot ({} bytes)", data.len());
    }

    if let Some(broadcaster) = &broadcaster {
        broadcaster.flush();
    }

    info!("Shutdown complete");
    Ok(())
}
