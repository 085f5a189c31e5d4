//! Best-effort publishing of token stats patches.

pub mod redpanda;

use async_trait::async_trait;

pub use redpanda::RedpandaBroadcaster;

use crate::domain::TokenStatsPatch;

/// Outbound patch publisher. Fire-and-forget from the orchestrator's point
/// of view: a failed publish never aborts event processing, the next event
/// for the same token carries the up-to-date aggregates.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn publish(&self, patch: &TokenStatsPatch) -> anyhow::Result<()>;

    /// Whether the bus connection is currently usable.
    fn ready(&self) -> bool;
}
