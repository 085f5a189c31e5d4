pub mod config;

pub use self::config::{
    AppSettings, BloomSettings, ClickHouseSettings, DedupeSettings, IngestSettings,
    PubSubSettings, RedisSettings, Settings, StoresSettings, WindowSettings, WriterSettings,
};
