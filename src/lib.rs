pub mod config;
pub mod cron;
pub mod db;
pub mod dedupe;
pub mod domain;
pub mod ingest;
pub mod pubsub;
pub mod service;
pub mod window;

pub use crate::config::Settings;
pub use cron::CronScheduler;
pub use db::{ClickhouseClient, RawSwapWriter, RedisStore};
pub use ingest::SwapConsumer;
pub use pubsub::RedpandaBroadcaster;
pub use service::AggregatorService;
pub use window::WindowEngine;
