//! In-memory job record store.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{JobId, JobRecord, JobStatus, OwnerId};
use crate::ports::{Claim, JobStore, StoreError};

#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    records: Mutex<HashMap<JobId, JobRecord>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, record: JobRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        if records.contains_key(&record.id) {
            return Err(StoreError::Conflict(format!("job {} already exists", record.id)));
        }
        records.insert(record.id, record);
        Ok(())
    }

    async fn get(&self, job_id: JobId) -> Result<Option<JobRecord>, StoreError> {
        let records = self.records.lock().await;
        Ok(records.get(&job_id).cloned())
    }

    async fn claim(&self, job_id: JobId, now: DateTime<Utc>) -> Result<Claim, StoreError> {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(&job_id)
            .ok_or_else(|| StoreError::NotFound(format!("job {job_id}")))?;

        match record.status {
            JobStatus::Pending => {
                record
                    .start_processing(now)
                    .map_err(|e| StoreError::Conflict(e.to_string()))?;
                Ok(Claim::Claimed(record.clone()))
            }
            JobStatus::Processing => Ok(Claim::InFlight(record.clone())),
            _ => Ok(Claim::Terminal(record.clone())),
        }
    }

    async fn save(&self, record: &JobRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        let stored = records
            .get_mut(&record.id)
            .ok_or_else(|| StoreError::NotFound(format!("job {}", record.id)))?;
        if stored.is_terminal() {
            return Err(StoreError::Conflict(format!(
                "job {} is already {}",
                record.id,
                stored.status.as_str()
            )));
        }
        *stored = record.clone();
        Ok(())
    }

    async fn save_if_unchanged(
        &self,
        record: &JobRecord,
        seen: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        let stored = records
            .get_mut(&record.id)
            .ok_or_else(|| StoreError::NotFound(format!("job {}", record.id)))?;
        if stored.is_terminal() {
            return Err(StoreError::Conflict(format!(
                "job {} is already {}",
                record.id,
                stored.status.as_str()
            )));
        }
        if stored.updated_at != seen {
            return Err(StoreError::Conflict(format!(
                "job {} was updated at {}",
                record.id, stored.updated_at
            )));
        }
        *stored = record.clone();
        Ok(())
    }

    async fn touch(&self, job_id: JobId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        let stored = records
            .get_mut(&job_id)
            .ok_or_else(|| StoreError::NotFound(format!("job {job_id}")))?;
        if stored.is_terminal() {
            return Err(StoreError::Conflict(format!(
                "job {job_id} is already {}",
                stored.status.as_str()
            )));
        }
        stored.updated_at = stored.updated_at.max(at);
        Ok(())
    }

    async fn list_stale(&self, updated_before: DateTime<Utc>) -> Result<Vec<JobRecord>, StoreError> {
        let records = self.records.lock().await;
        let mut stale: Vec<JobRecord> = records
            .values()
            .filter(|r| !r.is_terminal() && r.updated_at < updated_before)
            .cloned()
            .collect();
        stale.sort_by_key(|r| r.updated_at);
        Ok(stale)
    }

    async fn list_for_owner(&self, owner: &OwnerId) -> Result<Vec<JobRecord>, StoreError> {
        let records = self.records.lock().await;
        let mut mine: Vec<JobRecord> = records
            .values()
            .filter(|r| &r.owner_id == owner)
            .cloned()
            .collect();
        mine.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(mine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobAction, JobOutcome, NewJob, PropertyId, ScanTally};
    use chrono::{Duration, TimeZone};
    use ulid::Ulid;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn pending(owner: &str, at: DateTime<Utc>) -> JobRecord {
        JobRecord::pending(
            NewJob {
                id: JobId::from_ulid(Ulid::new()),
                owner_id: OwnerId::new(owner),
                property_id: PropertyId::new("site"),
                property_url: "https://example.com/".to_string(),
                action: JobAction::Check,
                requested_url_count: 3,
                estimated_credits: 3,
            },
            at,
        )
    }

    #[tokio::test]
    async fn claim_moves_pending_to_processing_once() {
        let store = InMemoryJobStore::new();
        let job = pending("u", t0());
        let id = job.id;
        store.insert(job).await.unwrap();

        let first = store.claim(id, t0()).await.unwrap();
        assert!(matches!(first, Claim::Claimed(ref r) if r.status == JobStatus::Processing));

        let second = store.claim(id, t0()).await.unwrap();
        assert!(matches!(second, Claim::InFlight(_)));
    }

    #[tokio::test]
    async fn claim_on_terminal_record_reports_terminal() {
        let store = InMemoryJobStore::new();
        let mut job = pending("u", t0());
        let id = job.id;
        store.insert(job.clone()).await.unwrap();

        job.finalize(JobOutcome::Successful, &ScanTally::new(0), "done", t0())
            .unwrap();
        store.save(&job).await.unwrap();

        let claim = store.claim(id, t0()).await.unwrap();
        assert!(matches!(claim, Claim::Terminal(ref r) if r.status == JobStatus::Successful));
    }

    #[tokio::test]
    async fn save_refuses_to_overwrite_terminal_record() {
        let store = InMemoryJobStore::new();
        let mut job = pending("u", t0());
        store.insert(job.clone()).await.unwrap();

        job.fail("boom", t0()).unwrap();
        store.save(&job).await.unwrap();

        let mut late = job.clone();
        late.status = JobStatus::Successful;
        assert!(matches!(store.save(&late).await, Err(StoreError::Conflict(_))));
        assert_eq!(store.get(job.id).await.unwrap().unwrap().status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn claim_unknown_job_is_not_found() {
        let store = InMemoryJobStore::new();
        let err = store
            .claim(JobId::from_ulid(Ulid::new()), t0())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn list_stale_skips_terminal_and_fresh_records() {
        let store = InMemoryJobStore::new();
        let old = pending("u", t0());
        let fresh = pending("u", t0() + Duration::hours(2));
        let mut done = pending("u", t0());
        done.fail("x", t0()).unwrap();

        store.insert(old.clone()).await.unwrap();
        store.insert(fresh).await.unwrap();
        store.insert(done).await.unwrap();

        let stale = store.list_stale(t0() + Duration::hours(1)).await.unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, old.id);
    }

    #[tokio::test]
    async fn touch_keeps_a_running_job_out_of_the_stale_list() {
        let store = InMemoryJobStore::new();
        let job = pending("u", t0());
        let id = job.id;
        store.insert(job).await.unwrap();
        store.claim(id, t0()).await.unwrap();

        store.touch(id, t0() + Duration::minutes(50)).await.unwrap();
        assert!(store.list_stale(t0() + Duration::minutes(30)).await.unwrap().is_empty());
        assert_eq!(store.get(id).await.unwrap().unwrap().status, JobStatus::Processing);
    }

    #[tokio::test]
    async fn save_if_unchanged_loses_to_a_newer_update() {
        let store = InMemoryJobStore::new();
        let job = pending("u", t0());
        let id = job.id;
        store.insert(job.clone()).await.unwrap();

        let seen = store.list_stale(t0() + Duration::hours(2)).await.unwrap()[0].clone();
        store.claim(id, t0() + Duration::minutes(90)).await.unwrap();

        let mut swept = seen.clone();
        swept.fail("stale", t0() + Duration::hours(2)).unwrap();
        let err = store.save_if_unchanged(&swept, seen.updated_at).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.get(id).await.unwrap().unwrap().status, JobStatus::Processing);

        let current = store.get(id).await.unwrap().unwrap();
        let mut swept = current.clone();
        swept.fail("stale", t0() + Duration::hours(3)).unwrap();
        store.save_if_unchanged(&swept, current.updated_at).await.unwrap();
        assert_eq!(store.get(id).await.unwrap().unwrap().status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn touch_on_terminal_record_conflicts() {
        let store = InMemoryJobStore::new();
        let mut job = pending("u", t0());
        store.insert(job.clone()).await.unwrap();
        job.fail("swept", t0()).unwrap();
        store.save(&job).await.unwrap();

        let err = store.touch(job.id, t0() + Duration::minutes(1)).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.get(job.id).await.unwrap().unwrap().updated_at, t0());
    }

    #[tokio::test]
    async fn list_for_owner_is_newest_first() {
        let store = InMemoryJobStore::new();
        let a = pending("u", t0());
        let b = pending("u", t0() + Duration::minutes(1));
        store.insert(a.clone()).await.unwrap();
        store.insert(b.clone()).await.unwrap();
        store.insert(pending("other", t0())).await.unwrap();

        let ids: Vec<JobId> = store
            .list_for_owner(&OwnerId::new("u"))
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![b.id, a.id]);
    }
}
