//! Pacing policies for the per-URL loop.

use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use governor::{Quota, RateLimiter};

use crate::ports::Pacing;

/// Fixed delay before every call.
#[derive(Debug, Clone, Copy)]
pub struct SerialDelay(pub Duration);

impl Default for SerialDelay {
    fn default() -> Self {
        Self(Duration::from_millis(200))
    }
}

#[async_trait]
impl Pacing for SerialDelay {
    async fn wait(&self) {
        if !self.0.is_zero() {
            tokio::time::sleep(self.0).await;
        }
    }
}

type DirectLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Token bucket shared by every caller holding the same instance.
pub struct TokenBucket {
    limiter: DirectLimiter,
}

impl TokenBucket {
    /// `None` when `per_second` is zero.
    pub fn per_second(per_second: u32) -> Option<Self> {
        let quota = Quota::per_second(NonZeroU32::new(per_second)?);
        Some(Self {
            limiter: RateLimiter::direct(quota),
        })
    }

    pub fn with_burst(per_second: u32, burst: u32) -> Option<Self> {
        let quota =
            Quota::per_second(NonZeroU32::new(per_second)?).allow_burst(NonZeroU32::new(burst)?);
        Some(Self {
            limiter: RateLimiter::direct(quota),
        })
    }
}

#[async_trait]
impl Pacing for TokenBucket {
    async fn wait(&self) {
        self.limiter.until_ready().await;
    }
}
