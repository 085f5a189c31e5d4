pub mod raw_swap;

pub use raw_swap::RawSwapRow;
