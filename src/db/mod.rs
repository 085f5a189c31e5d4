pub mod clickhouse;
pub mod models;
pub mod redis;

pub use self::clickhouse::{ClickhouseClient, RawSwapWriter, SwapStore, WriterError};
pub use self::models::RawSwapRow;
pub use self::redis::RedisStore;
