//! Consumer group: N tasks pulling task messages off the queue.
//!
//! - dropping or signalling `shutdown_tx` stops every consumer
//! - `shutdown_and_join()` waits for in-flight runs to finish

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::worker::TaskWorker;
use crate::ports::{Delivery, MessageQueue};

pub struct ConsumerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl ConsumerGroup {
    /// Spawn `n` consumers on `topic`.
    pub fn spawn(
        n: usize,
        queue: Arc<dyn MessageQueue>,
        topic: impl Into<String>,
        worker: Arc<TaskWorker>,
        receive_wait: Duration,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let topic: Arc<str> = Arc::from(topic.into());

        let joins = (0..n)
            .map(|consumer_id| {
                let queue = Arc::clone(&queue);
                let worker = Arc::clone(&worker);
                let topic = Arc::clone(&topic);
                let mut rx = shutdown_rx.clone();
                tokio::spawn(async move {
                    consume(consumer_id, queue, &topic, worker, receive_wait, &mut rx).await;
                })
            })
            .collect();

        Self { shutdown_tx, joins }
    }

    /// Stop taking new deliveries. Runs already in progress are not cancelled.
    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            let _ = join.await;
        }
    }
}

async fn consume(
    consumer_id: usize,
    queue: Arc<dyn MessageQueue>,
    topic: &str,
    worker: Arc<TaskWorker>,
    receive_wait: Duration,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    tracing::debug!(consumer_id, topic, "consumer started");
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let received = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    // group handle dropped
                    break;
                }
                continue;
            }
            received = queue.receive(topic, receive_wait) => received,
        };

        let delivery = match received {
            Ok(Some(delivery)) => delivery,
            Ok(None) => continue,
            Err(err) => {
                tracing::warn!(consumer_id, error = %err, "receive failed; backing off");
                tokio::time::sleep(receive_wait).await;
                continue;
            }
        };

        settle(consumer_id, queue.as_ref(), topic, &worker, delivery).await;
    }
    tracing::debug!(consumer_id, "consumer stopped");
}

/// Run one delivery and ack or nack it.
pub(crate) async fn settle(
    consumer_id: usize,
    queue: &dyn MessageQueue,
    topic: &str,
    worker: &TaskWorker,
    delivery: Delivery,
) {
    let ack = match worker.handle(&delivery.payload).await {
        Ok(outcome) => {
            tracing::debug!(consumer_id, delivery_id = %delivery.id, ?outcome, "delivery handled");
            true
        }
        Err(err) if err.is_retryable() => {
            tracing::warn!(
                consumer_id,
                delivery_id = %delivery.id,
                attempt = delivery.attempt,
                error = %err,
                "delivery failed; will be redelivered"
            );
            false
        }
        Err(err) => {
            tracing::error!(
                consumer_id,
                delivery_id = %delivery.id,
                error = %err,
                "delivery failed permanently; dropping"
            );
            true
        }
    };

    let settled = if ack {
        queue.ack(topic, delivery.id).await
    } else {
        queue.nack(topic, delivery.id).await
    };
    if let Err(err) = settled {
        tracing::error!(consumer_id, delivery_id = %delivery.id, error = %err, "settle failed");
    }
}
