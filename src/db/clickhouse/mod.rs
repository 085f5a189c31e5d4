pub mod client;
pub mod writer;

pub use client::{ClickhouseClient, SwapStore};
pub use writer::{AlertHook, RawSwapWriter, WriterError};
