//! MessageQueue port.
//!
//! Delivery is at-least-once: a received message stays owned by the receiver
//! until it is acked; a nack (or an expired lease) makes it deliverable again.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::DeliveryId;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("queue operation failed: {0}")]
    OperationFailed(String),

    #[error("unknown delivery: {0}")]
    UnknownDelivery(DeliveryId),
}

/// One delivery of a published payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub id: DeliveryId,
    pub payload: Vec<u8>,
    /// 1 on first delivery, incremented on every redelivery.
    pub attempt: u32,
}

#[async_trait]
pub trait MessageQueue: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), QueueError>;

    /// Wait up to `wait` for a delivery.
    async fn receive(&self, topic: &str, wait: Duration) -> Result<Option<Delivery>, QueueError>;

    async fn ack(&self, topic: &str, delivery: DeliveryId) -> Result<(), QueueError>;

    async fn nack(&self, topic: &str, delivery: DeliveryId) -> Result<(), QueueError>;
}
