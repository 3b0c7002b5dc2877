//! In-memory message queue.
//!
//! At-least-once: a delivery is leased to its receiver until acked. A nack
//! schedules a redelivery after the policy's backoff; a lease that outlives
//! its timeout is put back as if nacked without delay. A message delivered
//! `max_deliveries` times and nacked again is moved to the dead-letter list.

use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::domain::DeliveryId;
use crate::ports::{Delivery, IdGenerator, MessageQueue, QueueError};

/// Backoff between redeliveries of a nacked message.
#[derive(Debug, Clone)]
pub struct RedeliveryPolicy {
    /// Delay before the first redelivery.
    pub base_delay: Duration,
    pub multiplier: f64,
    /// Deliveries after which a nack dead-letters the message.
    pub max_deliveries: u32,
}

impl RedeliveryPolicy {
    /// Redeliver right away, up to `max_deliveries` times.
    pub fn immediate(max_deliveries: u32) -> Self {
        Self {
            base_delay: Duration::ZERO,
            multiplier: 1.0,
            max_deliveries,
        }
    }

    /// `base_delay * multiplier^(deliveries - 1)`
    pub fn next_delay(&self, deliveries: u32) -> Duration {
        let base_secs = self.base_delay.as_secs_f64();
        let delay_secs = base_secs * self.multiplier.powi(deliveries.saturating_sub(1) as i32);
        Duration::from_secs_f64(delay_secs)
    }
}

impl Default for RedeliveryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_deliveries: 5,
        }
    }
}

/// Message counts of one topic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueDepth {
    pub ready: usize,
    pub leased: usize,
    pub scheduled: usize,
    pub dead: usize,
}

#[derive(Debug)]
struct Message {
    payload: Vec<u8>,
    /// Times this message has been handed out.
    deliveries: u32,
}

#[derive(Debug)]
struct Lease {
    message: Message,
    expires_at: Instant,
}

#[derive(Debug)]
struct Scheduled {
    due: Instant,
    message: Message,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // min-heap on due time
        other.due.cmp(&self.due)
    }
}

#[derive(Debug, Default)]
struct Topic {
    ready: VecDeque<Message>,
    leased: HashMap<DeliveryId, Lease>,
    scheduled: BinaryHeap<Scheduled>,
    dead: Vec<Vec<u8>>,
}

impl Topic {
    /// Move due redeliveries and expired leases back to the ready list.
    fn promote(&mut self, now: Instant) {
        while let Some(entry) = self.scheduled.peek() {
            if entry.due > now {
                break;
            }
            if let Some(entry) = self.scheduled.pop() {
                self.ready.push_back(entry.message);
            }
        }

        let expired: Vec<DeliveryId> = self
            .leased
            .iter()
            .filter(|(_, lease)| lease.expires_at <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some(lease) = self.leased.remove(&id) {
                tracing::warn!(delivery_id = %id, "lease expired; redelivering");
                self.ready.push_back(lease.message);
            }
        }
    }

    fn next_wake(&self) -> Option<Instant> {
        let scheduled = self.scheduled.peek().map(|s| s.due);
        let lease = self.leased.values().map(|l| l.expires_at).min();
        match (scheduled, lease) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn depth(&self) -> QueueDepth {
        QueueDepth {
            ready: self.ready.len(),
            leased: self.leased.len(),
            scheduled: self.scheduled.len(),
            dead: self.dead.len(),
        }
    }
}

pub struct InMemoryQueue {
    topics: Mutex<HashMap<String, Topic>>,
    notify: Notify,
    ids: Arc<dyn IdGenerator>,
    lease_timeout: Duration,
    policy: RedeliveryPolicy,
    reject_publish: AtomicBool,
}

impl InMemoryQueue {
    pub fn new(ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            notify: Notify::new(),
            ids,
            lease_timeout: Duration::from_secs(600),
            policy: RedeliveryPolicy::default(),
            reject_publish: AtomicBool::new(false),
        }
    }

    pub fn with_lease_timeout(mut self, timeout: Duration) -> Self {
        self.lease_timeout = timeout;
        self
    }

    pub fn with_redelivery(mut self, policy: RedeliveryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Make `publish` fail until switched back.
    pub fn set_reject_publish(&self, reject: bool) {
        self.reject_publish.store(reject, Ordering::SeqCst);
    }

    pub async fn depth(&self, topic: &str) -> QueueDepth {
        let topics = self.topics.lock().await;
        topics.get(topic).map(Topic::depth).unwrap_or_default()
    }

    pub async fn dead_letters(&self, topic: &str) -> Vec<Vec<u8>> {
        let topics = self.topics.lock().await;
        topics.get(topic).map(|t| t.dead.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl MessageQueue for InMemoryQueue {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), QueueError> {
        if self.reject_publish.load(Ordering::SeqCst) {
            return Err(QueueError::OperationFailed(format!(
                "publish to {topic} rejected"
            )));
        }
        {
            let mut topics = self.topics.lock().await;
            topics.entry(topic.to_string()).or_default().ready.push_back(Message {
                payload,
                deliveries: 0,
            });
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn receive(&self, topic: &str, wait: Duration) -> Result<Option<Delivery>, QueueError> {
        let deadline = Instant::now() + wait;
        loop {
            // Register interest before looking, so a publish between the
            // check and the wait is not missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next_wake = {
                let mut topics = self.topics.lock().await;
                let state = topics.entry(topic.to_string()).or_default();
                let now = Instant::now();
                state.promote(now);

                if let Some(mut message) = state.ready.pop_front() {
                    message.deliveries += 1;
                    let id = self.ids.generate_delivery_id();
                    let delivery = Delivery {
                        id,
                        payload: message.payload.clone(),
                        attempt: message.deliveries,
                    };
                    state.leased.insert(
                        id,
                        Lease {
                            message,
                            expires_at: now + self.lease_timeout,
                        },
                    );
                    return Ok(Some(delivery));
                }
                state.next_wake()
            };

            if Instant::now() >= deadline {
                return Ok(None);
            }
            let wake = next_wake.map_or(deadline, |w| w.min(deadline));
            tokio::select! {
                _ = &mut notified => {},
                _ = tokio::time::sleep_until(wake) => {},
            }
        }
    }

    async fn ack(&self, topic: &str, delivery: DeliveryId) -> Result<(), QueueError> {
        let mut topics = self.topics.lock().await;
        topics
            .get_mut(topic)
            .and_then(|t| t.leased.remove(&delivery))
            .map(|_| ())
            .ok_or(QueueError::UnknownDelivery(delivery))
    }

    async fn nack(&self, topic: &str, delivery: DeliveryId) -> Result<(), QueueError> {
        {
            let mut topics = self.topics.lock().await;
            let state = topics
                .get_mut(topic)
                .ok_or(QueueError::UnknownDelivery(delivery))?;
            let lease = state
                .leased
                .remove(&delivery)
                .ok_or(QueueError::UnknownDelivery(delivery))?;
            let message = lease.message;

            if message.deliveries >= self.policy.max_deliveries {
                tracing::error!(
                    delivery_id = %delivery,
                    deliveries = message.deliveries,
                    "delivery limit reached; dead-lettering message"
                );
                state.dead.push(message.payload);
                return Ok(());
            }

            let delay = self.policy.next_delay(message.deliveries);
            if delay.is_zero() {
                state.ready.push_back(message);
            } else {
                state.scheduled.push(Scheduled {
                    due: Instant::now() + delay,
                    message,
                });
            }
        }
        self.notify.notify_waiters();
        Ok(())
    }
}
