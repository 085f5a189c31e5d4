use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, File};
use serde::Deserialize;

/// Application-level identity and lifecycle settings.
#[derive(Debug, Deserialize, Clone)]
pub struct AppSettings {
    #[serde(default = "default_instance_id")]
    pub instance_id: String,
    /// How long shutdown may spend draining the writer and consumers.
    #[serde(default = "default_shutdown_timeout", with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    /// Periodic window-snapshot interval. Unset means snapshot on clean
    /// shutdown only.
    #[serde(default, with = "humantime_serde")]
    pub snapshot_interval: Option<Duration>,
}

fn default_instance_id() -> String {
    "swapstats-1".to_string()
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            instance_id: default_instance_id(),
            shutdown_timeout: default_shutdown_timeout(),
            snapshot_interval: None,
        }
    }
}

/// Rolling-window engine settings.
#[derive(Debug, Deserialize, Clone)]
pub struct WindowSettings {
    /// How far the watermark trails wall clock; events older than
    /// `now - grace` are dropped as late.
    #[serde(default = "default_grace", with = "humantime_serde")]
    pub grace: Duration,
    #[serde(default = "default_buckets_per_day")]
    pub buckets_per_day: usize,
    #[serde(default = "default_true")]
    pub coerce_to_utc: bool,
}

fn default_grace() -> Duration {
    Duration::from_secs(120)
}

fn default_buckets_per_day() -> usize {
    1440
}

fn default_true() -> bool {
    true
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            grace: default_grace(),
            buckets_per_day: default_buckets_per_day(),
            coerce_to_utc: true,
        }
    }
}

/// Broker consumer settings for the raw swap topic.
#[derive(Debug, Deserialize, Clone)]
pub struct IngestSettings {
    #[serde(default = "default_brokers")]
    pub brokers: Vec<String>,
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default = "default_group_id")]
    pub group_id: String,
    /// Where a new group starts: "earliest" or "latest".
    #[serde(default = "default_start")]
    pub start: String,
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
    #[serde(default = "default_session_timeout", with = "humantime_serde")]
    pub session_timeout: Duration,
    #[serde(default = "default_rebalance_timeout", with = "humantime_serde")]
    pub rebalance_timeout: Duration,
}

fn default_brokers() -> Vec<String> {
    vec!["localhost:9092".to_string()]
}

fn default_topic() -> String {
    "swaps.raw".to_string()
}

fn default_group_id() -> String {
    "swapstats".to_string()
}

fn default_start() -> String {
    "earliest".to_string()
}

fn default_max_bytes() -> usize {
    1_048_576
}

fn default_session_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_rebalance_timeout() -> Duration {
    Duration::from_secs(300)
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            brokers: default_brokers(),
            topic: default_topic(),
            group_id: default_group_id(),
            start: default_start(),
            max_bytes: default_max_bytes(),
            session_timeout: default_session_timeout(),
            rebalance_timeout: default_rebalance_timeout(),
        }
    }
}

/// Probabilistic prefilter in front of the authoritative dedupe set.
#[derive(Debug, Deserialize, Clone)]
pub struct BloomSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_bloom_key")]
    pub key: String,
    #[serde(default = "default_bloom_capacity")]
    pub capacity: i64,
    #[serde(default = "default_bloom_error_rate")]
    pub error_rate: f64,
}

fn default_bloom_key() -> String {
    "swapstats:dedupe:bf:events".to_string()
}

fn default_bloom_capacity() -> i64 {
    1_000_000
}

fn default_bloom_error_rate() -> f64 {
    0.001
}

impl Default for BloomSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            key: default_bloom_key(),
            capacity: default_bloom_capacity(),
            error_rate: default_bloom_error_rate(),
        }
    }
}

/// Event-id deduplication settings.
#[derive(Debug, Deserialize, Clone)]
pub struct DedupeSettings {
    #[serde(default = "default_dedupe_prefix")]
    pub prefix: String,
    /// How long a seen event id stays authoritative. Outside the TTL an id
    /// may re-enter; that is the accepted trade-off.
    #[serde(default = "default_dedupe_ttl", with = "humantime_serde")]
    pub ttl: Duration,
    /// Sweep interval for the in-memory deduper variant.
    #[serde(default = "default_janitor_interval", with = "humantime_serde")]
    pub janitor_interval: Duration,
    #[serde(default)]
    pub bloom: BloomSettings,
}

fn default_dedupe_prefix() -> String {
    "swapstats:dedupe:".to_string()
}

fn default_dedupe_ttl() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_janitor_interval() -> Duration {
    Duration::from_secs(60)
}

impl Default for DedupeSettings {
    fn default() -> Self {
        Self {
            prefix: default_dedupe_prefix(),
            ttl: default_dedupe_ttl(),
            janitor_interval: default_janitor_interval(),
            bloom: BloomSettings::default(),
        }
    }
}

/// Shared cache (dedupe set, bloom filter, window snapshots).
#[derive(Debug, Deserialize, Clone)]
pub struct RedisSettings {
    #[serde(default = "default_redis_url")]
    pub url: String,
    #[serde(default = "default_cache_prefix")]
    pub prefix: String,
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_cache_prefix() -> String {
    "swapstats".to_string()
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            prefix: default_cache_prefix(),
        }
    }
}

/// Batching behaviour of the raw-swap writer.
#[derive(Debug, Deserialize, Clone)]
pub struct WriterSettings {
    #[serde(default = "default_batch_max_rows")]
    pub batch_max_rows: usize,
    #[serde(default = "default_batch_max_interval", with = "humantime_serde")]
    pub batch_max_interval: Duration,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff", with = "humantime_serde")]
    pub retry_backoff: Duration,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_batch_max_rows() -> usize {
    1000
}

fn default_batch_max_interval() -> Duration {
    Duration::from_millis(200)
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff() -> Duration {
    Duration::from_millis(200)
}

fn default_queue_capacity() -> usize {
    8192
}

impl Default for WriterSettings {
    fn default() -> Self {
        Self {
            batch_max_rows: default_batch_max_rows(),
            batch_max_interval: default_batch_max_interval(),
            max_retries: default_max_retries(),
            retry_backoff: default_retry_backoff(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// ClickHouse connection and writer configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct ClickHouseSettings {
    #[serde(default = "default_clickhouse_url")]
    pub url: String,
    #[serde(default = "default_clickhouse_user")]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_clickhouse_database")]
    pub database: String,
    /// Connection attempts at startup before giving up.
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    /// Delay before the first reconnect attempt; doubles per attempt.
    #[serde(default = "default_connect_backoff", with = "humantime_serde")]
    pub connect_backoff: Duration,
    #[serde(default)]
    pub writer: WriterSettings,
}

fn default_clickhouse_url() -> String {
    "http://localhost:8123".to_string()
}

fn default_clickhouse_user() -> String {
    "default".to_string()
}

fn default_clickhouse_database() -> String {
    "swapstats".to_string()
}

fn default_connect_attempts() -> u32 {
    3
}

fn default_connect_backoff() -> Duration {
    Duration::from_millis(500)
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoresSettings {
    #[serde(default)]
    pub redis: RedisSettings,
    pub clickhouse: ClickHouseSettings,
}

/// Patch broadcasting over the Kafka-compatible bus.
#[derive(Debug, Deserialize, Clone)]
pub struct PubSubSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_pubsub_brokers")]
    pub brokers: String,
    #[serde(default = "default_broadcast_prefix")]
    pub broadcast_prefix: String,
}

fn default_pubsub_brokers() -> String {
    "localhost:9092".to_string()
}

fn default_broadcast_prefix() -> String {
    "swapstats".to_string()
}

impl Default for PubSubSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            brokers: default_pubsub_brokers(),
            broadcast_prefix: default_broadcast_prefix(),
        }
    }
}

/// Root application configuration.
///
/// Loaded at startup from the YAML file named by the `CONFIG` environment
/// variable (default `config.yaml`).
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    #[serde(default)]
    pub app: AppSettings,
    #[serde(default)]
    pub window: WindowSettings,
    #[serde(default)]
    pub ingest: IngestSettings,
    #[serde(default)]
    pub dedupe: DedupeSettings,
    pub stores: StoresSettings,
    #[serde(default)]
    pub pubsub: PubSubSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let path = std::env::var("CONFIG").unwrap_or_else(|_| "config.yaml".to_string());

        let s = Config::builder()
            .add_source(File::from(Path::new(&path)))
            .build()?;

        let settings: Settings = s.try_deserialize()?;

        Ok(settings)
    }
}
