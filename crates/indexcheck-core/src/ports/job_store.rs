//! JobStore port: the job record log.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{JobId, JobRecord, OwnerId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Result of an atomic claim on a job record.
#[derive(Debug, Clone, PartialEq)]
pub enum Claim {
    /// Pending -> Processing happened; this caller owns the run.
    Claimed(JobRecord),
    /// Record already terminal: duplicate delivery.
    Terminal(JobRecord),
    /// Record already processing under another delivery.
    InFlight(JobRecord),
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, record: JobRecord) -> Result<(), StoreError>;

    async fn get(&self, job_id: JobId) -> Result<Option<JobRecord>, StoreError>;

    /// Atomically move a pending record to processing.
    async fn claim(&self, job_id: JobId, now: DateTime<Utc>) -> Result<Claim, StoreError>;

    /// Overwrite a record. Refused with `Conflict` if the stored copy is terminal.
    async fn save(&self, record: &JobRecord) -> Result<(), StoreError>;

    /// Like `save`, but also refused with `Conflict` when the stored copy's
    /// `updated_at` is no longer `seen`.
    async fn save_if_unchanged(
        &self,
        record: &JobRecord,
        seen: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Move `updated_at` of a non-terminal record to `at`. Refused with
    /// `Conflict` if the stored copy is terminal.
    async fn touch(&self, job_id: JobId, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Non-terminal records not updated since `updated_before`.
    async fn list_stale(&self, updated_before: DateTime<Utc>) -> Result<Vec<JobRecord>, StoreError>;

    /// All records of one owner, newest first.
    async fn list_for_owner(&self, owner: &OwnerId) -> Result<Vec<JobRecord>, StoreError>;
}
