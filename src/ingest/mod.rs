pub mod consumer;

pub use consumer::SwapConsumer;
