//! Pacing port: how the worker spaces out external calls.

use async_trait::async_trait;

/// Waits before each external call of the per-URL loop.
#[async_trait]
pub trait Pacing: Send + Sync {
    async fn wait(&self);
}
