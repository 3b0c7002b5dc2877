//! IdGenerator port.
//!
//! Ids are ULIDs whose timestamp part comes from the injected [`Clock`], so
//! ids minted under a `FixedClock` still sort by creation time.

use crate::domain::{DeliveryId, JobId};
use crate::ports::Clock;
use ulid::Ulid;

pub trait IdGenerator: Send + Sync {
    fn generate_job_id(&self) -> JobId;

    fn generate_delivery_id(&self) -> DeliveryId;
}

/// ULID based generator.
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_job_id(&self) -> JobId {
        JobId::from(self.next_ulid())
    }

    fn generate_delivery_id(&self) -> DeliveryId {
        DeliveryId::from(self.next_ulid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::FixedClock;
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::Arc;

    #[test]
    fn job_and_delivery_ids_never_collide() {
        let ids = UlidGenerator::new(crate::ports::SystemClock);
        let jobs: std::collections::HashSet<_> = (0..100).map(|_| ids.generate_job_id()).collect();
        assert_eq!(jobs.len(), 100);
        assert_ne!(
            ids.generate_delivery_id().as_ulid(),
            ids.generate_delivery_id().as_ulid()
        );
    }

    #[test]
    fn ids_sort_by_clock_time() {
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()));
        let ids = UlidGenerator::new(clock.clone());

        let earlier = ids.generate_job_id();
        clock.advance(Duration::milliseconds(5));
        let later = ids.generate_job_id();

        assert!(earlier < later);
        assert_eq!(
            later.as_ulid().timestamp_ms(),
            clock.now().timestamp_millis() as u64
        );
    }
}
