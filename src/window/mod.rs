pub mod engine;
pub mod rolling;
pub mod snapshot;
pub mod watermark;

pub use engine::{ApplyError, WindowEngine};
pub use snapshot::SnapshotError;
