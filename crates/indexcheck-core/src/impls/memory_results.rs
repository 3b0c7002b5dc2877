//! In-memory result store.
//!
//! Keyed by [`ResultKey`], so an upsert can never create a second record for
//! the same (owner, property, url).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{OwnerId, PropertyId, ResultKey, ResultRecord};
use crate::ports::{ResultStore, StoreError};

#[derive(Debug, Default)]
pub struct InMemoryResultStore {
    records: Mutex<BTreeMap<ResultKey, ResultRecord>>,
    unavailable: AtomicBool,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make writes fail with `StoreError::Unavailable` until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn upsert_batch(&self, records: Vec<ResultRecord>) -> Result<usize, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("result store offline".to_string()));
        }
        let written = records.len();
        let mut stored = self.records.lock().await;
        for record in records {
            stored.insert(record.key(), record);
        }
        Ok(written)
    }

    async fn get(&self, key: &ResultKey) -> Result<Option<ResultRecord>, StoreError> {
        Ok(self.records.lock().await.get(key).cloned())
    }

    async fn list_for_property(
        &self,
        owner: &OwnerId,
        property: &PropertyId,
    ) -> Result<Vec<ResultRecord>, StoreError> {
        let stored = self.records.lock().await;
        Ok(stored
            .values()
            .filter(|r| &r.owner_id == owner && &r.property_id == property)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{UrlStatus, Verdict};
    use chrono::{Duration, TimeZone, Utc};

    fn record(url: &str, status: UrlStatus, minute: i64) -> ResultRecord {
        ResultRecord {
            owner_id: OwnerId::new("u"),
            property_id: PropertyId::new("site"),
            property_url: "https://example.com/".into(),
            url: url.into(),
            status,
            last_checked_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                + Duration::minutes(minute),
        }
    }

    #[tokio::test]
    async fn double_upsert_keeps_one_record_with_latest_values() {
        let store = InMemoryResultStore::new();
        let first = record("https://example.com/a", UrlStatus::Verdict(Verdict::Fail), 0);
        let second = record("https://example.com/a", UrlStatus::Verdict(Verdict::Pass), 5);

        store.upsert_batch(vec![first]).await.unwrap();
        store.upsert_batch(vec![second.clone()]).await.unwrap();

        assert_eq!(store.len().await, 1);
        assert_eq!(store.get(&second.key()).await.unwrap(), Some(second));
    }

    #[tokio::test]
    async fn outage_writes_nothing() {
        let store = InMemoryResultStore::new();
        store.set_unavailable(true);

        let err = store
            .upsert_batch(vec![record("https://example.com/a", UrlStatus::ApiError, 0)])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn listing_is_scoped_to_owner_and_property() {
        let store = InMemoryResultStore::new();
        let mut foreign = record("https://example.com/a", UrlStatus::Unknown, 0);
        foreign.owner_id = OwnerId::new("someone-else");

        store
            .upsert_batch(vec![
                record("https://example.com/a", UrlStatus::Unknown, 0),
                record("https://example.com/b", UrlStatus::Unknown, 0),
                foreign,
            ])
            .await
            .unwrap();

        let mine = store
            .list_for_property(&OwnerId::new("u"), &PropertyId::new("site"))
            .await
            .unwrap();
        assert_eq!(mine.len(), 2);
    }
}
