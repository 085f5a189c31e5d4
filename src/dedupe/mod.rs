//! Event-id deduplication: at-most-once delivery to the aggregator despite
//! source-level retries and broker re-delivery.

pub mod bloom;
pub mod memory;
pub mod redis;

use async_trait::async_trait;

pub use self::bloom::Bloom;
pub use self::memory::MemoryDeduper;
pub use self::redis::RedisDeduper;

/// Duplicate filter in front of the window engine.
///
/// `mark_seen` is the authoritative set-if-absent: exactly one of N
/// concurrent callers for the same id gets `true`. `is_duplicate` is the
/// cheap prefilter query the orchestrator runs before applying an event.
/// Errors mean the cache is unavailable and the caller must treat the event
/// as retryable, never as skippable.
#[async_trait]
pub trait Deduper: Send + Sync {
    async fn is_duplicate(&self, event_id: &str) -> anyhow::Result<bool>;

    /// Marks the id as seen. Returns `true` when the id was new.
    async fn mark_seen(&self, event_id: &str) -> anyhow::Result<bool>;

    async fn health(&self) -> anyhow::Result<()>;
}
