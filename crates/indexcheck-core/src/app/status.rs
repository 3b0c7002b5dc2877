//! Job status polling, scoped to the calling owner.

use std::sync::Arc;

use crate::domain::{JobId, JobRecord, OwnerId, PipelineError};
use crate::ports::JobStore;

pub struct JobStatusQuery {
    jobs: Arc<dyn JobStore>,
}

impl JobStatusQuery {
    pub fn new(jobs: Arc<dyn JobStore>) -> Self {
        Self { jobs }
    }

    /// A job of another owner is reported as not found.
    pub async fn job_status(
        &self,
        caller: Option<&OwnerId>,
        job_id: JobId,
    ) -> Result<JobRecord, PipelineError> {
        let owner = caller.ok_or_else(|| {
            PipelineError::Unauthenticated("You must be signed in to view jobs.".to_string())
        })?;
        self.jobs
            .get(job_id)
            .await?
            .filter(|r| &r.owner_id == owner)
            .ok_or_else(|| PipelineError::NotFound(format!("Job {job_id} not found.")))
    }

    /// Newest first.
    pub async fn list_jobs(&self, caller: Option<&OwnerId>) -> Result<Vec<JobRecord>, PipelineError> {
        let owner = caller.ok_or_else(|| {
            PipelineError::Unauthenticated("You must be signed in to view jobs.".to_string())
        })?;
        Ok(self.jobs.list_for_owner(owner).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ErrorCode, JobAction, NewJob, PropertyId};
    use crate::impls::InMemoryJobStore;
    use chrono::Utc;
    use ulid::Ulid;

    #[tokio::test]
    async fn jobs_are_owner_scoped() {
        let store = Arc::new(InMemoryJobStore::new());
        let job = JobRecord::pending(
            NewJob {
                id: JobId::from_ulid(Ulid::new()),
                owner_id: OwnerId::new("alice"),
                property_id: PropertyId::new("p"),
                property_url: "https://example.com/".to_string(),
                action: JobAction::Check,
                requested_url_count: 1,
                estimated_credits: 1,
            },
            Utc::now(),
        );
        store.insert(job.clone()).await.unwrap();
        let query = JobStatusQuery::new(store);

        let alice = OwnerId::new("alice");
        let bob = OwnerId::new("bob");
        assert_eq!(query.job_status(Some(&alice), job.id).await.unwrap(), job);
        assert_eq!(
            query.job_status(Some(&bob), job.id).await.unwrap_err().code(),
            ErrorCode::NotFound
        );
        assert_eq!(
            query.job_status(None, job.id).await.unwrap_err().code(),
            ErrorCode::Unauthenticated
        );
        assert!(query.list_jobs(Some(&bob)).await.unwrap().is_empty());
    }
}
