//! Job record and status management.
//!
//! One `JobRecord` exists per enqueued pipeline run. The dispatcher creates it
//! in `Pending`; only the worker (and the reconciler sweep) mutate it
//! afterwards. State transitions go through methods, never direct field
//! writes, and every method refuses to touch a record that is already
//! terminal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{JobId, OwnerId, PropertyId};

/// What a job does per URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobAction {
    /// Inspect each URL and record its verdict.
    Check,
    /// Ask the external API to re-crawl each URL.
    Reindex,
}

impl JobAction {
    pub fn as_str(self) -> &'static str {
        match self {
            JobAction::Check => "check",
            JobAction::Reindex => "reindex",
        }
    }
}

/// Job lifecycle.
///
/// - Pending -> Processing -> Successful
/// - Pending -> Processing -> PartialSuccess
/// - Pending -> Processing -> Failed
/// - Pending -> Failed (enqueue failure, reconciler sweep, failed debit)
/// - Processing -> Pending (claim released after a ledger or store outage)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Successful,
    PartialSuccess,
    Failed,
}

impl JobStatus {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Successful | JobStatus::PartialSuccess | JobStatus::Failed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Successful => "successful",
            JobStatus::PartialSuccess => "partial_success",
            JobStatus::Failed => "failed",
        }
    }
}

/// Detailed aggregate outcome of a finished run.
///
/// Several outcomes collapse onto the same [`JobStatus`]; the outcome is kept
/// alongside so operators can tell a storage failure from a failed inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Successful,
    CompletedWithErrors,
    CompletedPartialInspection,
    StorageFailed,
    Failed,
}

impl JobOutcome {
    pub fn status(self) -> JobStatus {
        match self {
            JobOutcome::Successful => JobStatus::Successful,
            JobOutcome::CompletedWithErrors | JobOutcome::CompletedPartialInspection => {
                JobStatus::PartialSuccess
            }
            JobOutcome::StorageFailed | JobOutcome::Failed => JobStatus::Failed,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobOutcome::Successful => "successful",
            JobOutcome::CompletedWithErrors => "completed_with_errors",
            JobOutcome::CompletedPartialInspection => "completed_partial_inspection",
            JobOutcome::StorageFailed => "storage_failed",
            JobOutcome::Failed => "failed",
        }
    }
}

/// Running counters of the per-URL loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanTally {
    /// URLs handed to the worker.
    pub requested: u32,
    /// URLs the external API answered with a verdict (or acknowledged).
    pub inspected: u32,
    /// Inspected URLs with a pass-like verdict.
    pub indexed: u32,
    /// URLs that ended with an error tag.
    pub errors: u32,
}

impl ScanTally {
    pub fn new(requested: u32) -> Self {
        Self {
            requested,
            ..Self::default()
        }
    }

    /// Aggregate the counters into the job's outcome.
    pub fn outcome(&self) -> JobOutcome {
        if self.requested > 0 && self.inspected == 0 {
            JobOutcome::Failed
        } else if self.errors > 0 {
            JobOutcome::CompletedWithErrors
        } else if self.inspected < self.requested {
            JobOutcome::CompletedPartialInspection
        } else {
            JobOutcome::Successful
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobTransitionError {
    #[error("job {0} is already terminal")]
    AlreadyTerminal(JobId),

    #[error("job {job_id} cannot move from {from} to {to}")]
    Invalid {
        job_id: JobId,
        from: &'static str,
        to: &'static str,
    },
}

/// Fields fixed when a job is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJob {
    pub id: JobId,
    pub owner_id: OwnerId,
    pub property_id: PropertyId,
    pub property_url: String,
    pub action: JobAction,
    pub requested_url_count: u32,
    pub estimated_credits: u64,
}

/// Job record: the saga log entry of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub owner_id: OwnerId,
    pub property_id: PropertyId,
    pub property_url: String,
    pub action: JobAction,
    pub status: JobStatus,
    pub outcome: Option<JobOutcome>,
    pub message: String,

    pub requested_url_count: u32,
    pub estimated_credits: u64,
    pub credits_used: u64,
    /// Set once the worker's debit succeeded; cleared again by a refund.
    pub charged: bool,

    pub succeeded_count: u32,
    pub failed_count: u32,
    pub indexed_count: u32,

    /// When the per-URL loop began calling the external API. From then on
    /// the charge is never refunded.
    #[serde(default)]
    pub work_started_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn pending(new: NewJob, now: DateTime<Utc>) -> Self {
        let NewJob {
            id,
            owner_id,
            property_id,
            property_url,
            action,
            requested_url_count,
            estimated_credits,
        } = new;
        Self {
            id,
            owner_id,
            property_id,
            property_url,
            action,
            status: JobStatus::Pending,
            outcome: None,
            message: format!("Queued {requested_url_count} URLs for {}.", action.as_str()),
            requested_url_count,
            estimated_credits,
            credits_used: 0,
            charged: false,
            succeeded_count: 0,
            failed_count: 0,
            indexed_count: 0,
            work_started_at: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn ensure_open(&self) -> Result<(), JobTransitionError> {
        if self.is_terminal() {
            return Err(JobTransitionError::AlreadyTerminal(self.id));
        }
        Ok(())
    }

    /// Pending -> Processing.
    pub fn start_processing(&mut self, now: DateTime<Utc>) -> Result<(), JobTransitionError> {
        self.ensure_open()?;
        if self.status != JobStatus::Pending {
            return Err(JobTransitionError::Invalid {
                job_id: self.id,
                from: self.status.as_str(),
                to: JobStatus::Processing.as_str(),
            });
        }
        self.status = JobStatus::Processing;
        self.message = "Processing.".to_string();
        self.updated_at = now;
        Ok(())
    }

    fn ensure_processing(&self, to: JobStatus) -> Result<(), JobTransitionError> {
        self.ensure_open()?;
        if self.status != JobStatus::Processing {
            return Err(JobTransitionError::Invalid {
                job_id: self.id,
                from: self.status.as_str(),
                to: to.as_str(),
            });
        }
        Ok(())
    }

    /// Processing -> Pending, so a redelivery can claim the job again.
    /// Refused once external calls have begun.
    pub fn release(&mut self, now: DateTime<Utc>) -> Result<(), JobTransitionError> {
        self.ensure_processing(JobStatus::Pending)?;
        if self.work_started_at.is_some() {
            return Err(JobTransitionError::Invalid {
                job_id: self.id,
                from: "processing (work started)",
                to: JobStatus::Pending.as_str(),
            });
        }
        self.status = JobStatus::Pending;
        self.message = "Waiting for retry.".to_string();
        self.updated_at = now;
        Ok(())
    }

    /// The per-URL loop is about to make its first external call.
    pub fn mark_work_started(&mut self, now: DateTime<Utc>) -> Result<(), JobTransitionError> {
        self.ensure_processing(JobStatus::Processing)?;
        self.work_started_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Record a successful debit.
    pub fn record_charge(
        &mut self,
        amount: u64,
        now: DateTime<Utc>,
    ) -> Result<(), JobTransitionError> {
        self.ensure_open()?;
        self.credits_used = amount;
        self.charged = amount > 0;
        self.updated_at = now;
        Ok(())
    }

    /// Record that the charge was given back.
    pub fn record_refund(&mut self, now: DateTime<Utc>) -> Result<(), JobTransitionError> {
        self.ensure_open()?;
        self.credits_used = 0;
        self.charged = false;
        self.updated_at = now;
        Ok(())
    }

    /// Terminal transition with the aggregated counters.
    pub fn finalize(
        &mut self,
        outcome: JobOutcome,
        tally: &ScanTally,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), JobTransitionError> {
        self.ensure_open()?;
        self.status = outcome.status();
        self.outcome = Some(outcome);
        self.message = message.into();
        self.succeeded_count = tally.inspected;
        self.failed_count = tally.errors;
        self.indexed_count = tally.indexed;
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Terminal failure before any per-URL work happened.
    pub fn fail(
        &mut self,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), JobTransitionError> {
        self.finalize(JobOutcome::Failed, &ScanTally::default(), message, now)
    }
}
