//! Task worker: drives one task message through the job state machine.
//!
//! received -> credited -> authenticated -> processing -> stored | storage_failed -> finalized
//!
//! - received: atomic claim of the job record (pending -> processing).
//!   A terminal or already-processing record ends the delivery as a no-op.
//! - credited: debit `credits_to_charge`. Too few credits fails the job with
//!   nothing to compensate. A ledger or store outage releases the claim
//!   (processing -> pending) and returns a retryable error.
//! - authenticated: build the API client. A failure here refunds: nothing
//!   has been spent on the external API yet.
//! - processing: `work_started_at` is saved, then one call per URL, paced.
//!   A URL never aborts the loop. `updated_at` is refreshed every
//!   `heartbeat` so the reconciler leaves the job alone.
//! - stored: one batch upsert. A failure is reported in the outcome and
//!   message but not refunded, since the external calls were made.
//! - finalized: terminal status, counters, property summary.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::Instrument;

use super::auth::Authenticator;
use super::ledger::CreditLedger;
use crate::domain::{
    CodecError, JobAction, JobId, JobOutcome, JobRecord, JobStatus, JobTransitionError,
    PipelineError, PropertySummary, ResultRecord, ScanTally, TaskMessage, UrlStatus,
};
use crate::ports::{
    Claim, Clock, CredentialDirectory, JobStore, LedgerError, Pacing, PropertyDirectory,
    ResultStore, SearchConsole, StoreError,
};

/// How one delivery ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// This delivery drove the job to a terminal status.
    Finalized(JobStatus),
    /// The job was already terminal.
    Duplicate(JobStatus),
    /// Another delivery owns the job.
    InFlight,
    /// The job was finalized elsewhere (reconciler) while this delivery ran.
    Superseded,
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("undecodable task message: {0}")]
    Decode(#[from] CodecError),

    #[error("job store: {0}")]
    Store(#[from] StoreError),

    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Transition(#[from] JobTransitionError),
}

impl WorkerError {
    /// Whether redelivering the same message can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WorkerError::Store(StoreError::Unavailable(_))
                | WorkerError::Ledger(LedgerError::Storage(_))
        )
    }
}

/// Per-URL loop result.
struct Scan {
    tally: ScanTally,
    records: Vec<ResultRecord>,
    truncated: bool,
    /// The job was finalized elsewhere while the loop ran.
    taken_over: bool,
}

/// Last `updated_at` refresh of a running job.
struct Heartbeat {
    job_id: JobId,
    last: DateTime<Utc>,
}

pub struct TaskWorker {
    pub(crate) jobs: Arc<dyn JobStore>,
    pub(crate) results: Arc<dyn ResultStore>,
    pub(crate) properties: Arc<dyn PropertyDirectory>,
    pub(crate) credentials: Arc<dyn CredentialDirectory>,
    pub(crate) ledger: Arc<CreditLedger>,
    pub(crate) authenticator: Arc<Authenticator>,
    pub(crate) pacing: Arc<dyn Pacing>,
    pub(crate) clock: Arc<dyn Clock>,
    /// Budget of the per-URL loop.
    pub(crate) deadline: Duration,
    /// Interval between `updated_at` refreshes during the per-URL loop.
    pub(crate) heartbeat: chrono::Duration,
}

impl TaskWorker {
    /// Decode a queue payload and run it.
    pub async fn handle(&self, payload: &[u8]) -> Result<RunOutcome, WorkerError> {
        let message = TaskMessage::decode(payload).inspect_err(|err| {
            tracing::error!(error = %err, bytes = payload.len(), "dropping undecodable task message");
        })?;
        self.run(message).await
    }

    pub async fn run(&self, message: TaskMessage) -> Result<RunOutcome, WorkerError> {
        let span = tracing::info_span!(
            "job",
            job_id = %message.job_id,
            owner = %message.owner_id,
            action = message.action.as_str(),
        );
        self.run_stages(message).instrument(span).await
    }

    async fn run_stages(&self, message: TaskMessage) -> Result<RunOutcome, WorkerError> {
        let owner = &message.owner_id;
        let job_id = message.job_id;

        let mut record = match self.jobs.claim(job_id, self.clock.now()).await? {
            Claim::Claimed(record) => record,
            Claim::Terminal(record) => {
                tracing::info!(
                    stage = "received",
                    status = record.status.as_str(),
                    "job already terminal; duplicate delivery ignored"
                );
                return Ok(RunOutcome::Duplicate(record.status));
            }
            Claim::InFlight(_) => {
                tracing::info!(stage = "received", "job already processing; delivery ignored");
                return Ok(RunOutcome::InFlight);
            }
        };
        tracing::info!(stage = "received", urls = message.urls.len(), "job claimed");

        let amount = message.credits_to_charge;
        match self.ledger.debit(owner, job_id, amount).await {
            Ok(()) => {}
            Err(err @ LedgerError::Storage(_)) => {
                tracing::warn!(stage = "credited", error = %err, "ledger unavailable; releasing the job");
                self.release(&mut record).await;
                return Err(err.into());
            }
            Err(err) => {
                tracing::warn!(stage = "credited", error = %err, "debit failed");
                let text = PipelineError::from(err).to_string();
                record.fail(text, self.clock.now())?;
                return self.commit(&record).await;
            }
        }
        record.record_charge(amount, self.clock.now())?;
        if let Err(err) = self.jobs.save(&record).await {
            tracing::warn!(stage = "credited", error = %err, "could not record charge; giving it back");
            self.ledger.refund(owner, job_id, amount, "charge not recorded").await;
            if let StoreError::Conflict(_) = err {
                return Ok(RunOutcome::Superseded);
            }
            record.record_refund(self.clock.now())?;
            self.release(&mut record).await;
            return Err(err.into());
        }
        tracing::info!(stage = "credited", credits = amount, "credits charged");

        let client = match self.authenticator.authenticate(&message.auth).await {
            Ok(authenticated) => {
                if let Some(refreshed) = authenticated.refreshed {
                    if let Err(err) = self.credentials.save_refreshed_credential(owner, &refreshed).await {
                        tracing::warn!(error = %err, "could not persist refreshed credential");
                    }
                }
                authenticated.client
            }
            Err(err) => {
                tracing::warn!(
                    stage = "authenticated",
                    error = %err,
                    reauth = err.requires_reauthentication(),
                    "authentication failed; refunding"
                );
                self.ledger
                    .refund(owner, job_id, amount, "authentication failed before processing")
                    .await;
                let now = self.clock.now();
                record.record_refund(now)?;
                record.fail(err.user_message(), now)?;
                return self.commit(&record).await;
            }
        };
        tracing::info!(stage = "authenticated", "client ready");

        // past this save the charge is kept whatever happens to the run
        let mut started = record.clone();
        started.mark_work_started(self.clock.now())?;
        match self.jobs.save(&started).await {
            Ok(()) => record = started,
            Err(StoreError::Conflict(reason)) => {
                tracing::warn!(stage = "processing", reason = %reason, "job finalized elsewhere");
                return Ok(RunOutcome::Superseded);
            }
            Err(err) => {
                tracing::warn!(stage = "processing", error = %err, "could not record work start; giving the charge back");
                self.ledger.refund(owner, job_id, amount, "work start not recorded").await;
                record.record_refund(self.clock.now())?;
                self.release(&mut record).await;
                return Err(err.into());
            }
        }

        let beat = Heartbeat {
            job_id,
            last: record.updated_at,
        };
        let scan = match message.action {
            JobAction::Check => self.inspect_all(&message, client.as_ref(), beat).await,
            JobAction::Reindex => self.reindex_all(&message, client.as_ref(), beat).await,
        };
        tracing::info!(
            stage = "processing",
            inspected = scan.tally.inspected,
            indexed = scan.tally.indexed,
            errors = scan.tally.errors,
            truncated = scan.truncated,
            taken_over = scan.taken_over,
            "per-url loop done"
        );

        let storage_error = if scan.records.is_empty() {
            None
        } else {
            match self.results.upsert_batch(scan.records).await {
                Ok(written) => {
                    tracing::info!(stage = "stored", written, "results stored");
                    None
                }
                Err(err) => {
                    tracing::error!(stage = "storage_failed", error = %err, "result batch not stored");
                    Some(err)
                }
            }
        };

        if scan.taken_over {
            tracing::warn!(stage = "finalized", "job finalized elsewhere during the run; results kept");
            return Ok(RunOutcome::Superseded);
        }

        let outcome = match storage_error {
            Some(_) => JobOutcome::StorageFailed,
            None => scan.tally.outcome(),
        };
        let text = summary_message(message.action, &scan.tally, scan.truncated, storage_error.as_ref());
        record.finalize(outcome, &scan.tally, text, self.clock.now())?;
        let result = self.commit(&record).await?;

        if result == RunOutcome::Finalized(record.status) {
            self.update_summary(&message, &record, &scan.tally).await;
        }
        Ok(result)
    }

    /// Persist a terminal record.
    async fn commit(&self, record: &JobRecord) -> Result<RunOutcome, WorkerError> {
        match self.jobs.save(record).await {
            Ok(()) => {
                tracing::info!(
                    stage = "finalized",
                    status = record.status.as_str(),
                    outcome = record.outcome.map(|o| o.as_str()),
                    credits_used = record.credits_used,
                    "job finalized"
                );
                Ok(RunOutcome::Finalized(record.status))
            }
            Err(StoreError::Conflict(reason)) => {
                tracing::warn!(stage = "finalized", reason = %reason, "job finalized elsewhere");
                Ok(RunOutcome::Superseded)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Hand an unstarted claim back so a redelivery can take it again.
    async fn release(&self, record: &mut JobRecord) {
        if let Err(err) = record.release(self.clock.now()) {
            tracing::warn!(error = %err, "job not released");
            return;
        }
        match self.jobs.save(record).await {
            Ok(()) => tracing::info!(stage = "received", "job released for redelivery"),
            Err(err) => {
                tracing::warn!(error = %err, "job not released; left for the reconciler")
            }
        }
    }

    fn deadline_reached(&self, started: Instant) -> bool {
        started.elapsed() >= self.deadline
    }

    /// Refresh `updated_at` when a heartbeat is due. False once the job was
    /// finalized elsewhere.
    async fn keep_alive(&self, beat: &mut Heartbeat) -> bool {
        let now = self.clock.now();
        if now - beat.last < self.heartbeat {
            return true;
        }
        match self.jobs.touch(beat.job_id, now).await {
            Ok(()) => {
                beat.last = now;
                true
            }
            Err(StoreError::Conflict(reason)) => {
                tracing::warn!(reason = %reason, "job finalized elsewhere; stopping");
                false
            }
            Err(err) => {
                tracing::warn!(error = %err, "heartbeat not recorded");
                true
            }
        }
    }

    async fn inspect_all(
        &self,
        message: &TaskMessage,
        client: &dyn SearchConsole,
        mut beat: Heartbeat,
    ) -> Scan {
        let mut tally = ScanTally::new(message.urls.len() as u32);
        let mut records = Vec::with_capacity(message.urls.len());
        let mut truncated = false;
        let mut taken_over = false;
        let started = Instant::now();

        for url in &message.urls {
            if self.deadline_reached(started) {
                tracing::warn!(processed = records.len(), "run deadline reached; stopping");
                truncated = true;
                break;
            }
            if !self.keep_alive(&mut beat).await {
                taken_over = true;
                break;
            }
            self.pacing.wait().await;

            let status = match client.inspect(url, &message.property_url).await {
                Ok(Some(verdict)) => {
                    tally.inspected += 1;
                    if verdict.is_pass_like() {
                        tally.indexed += 1;
                    }
                    UrlStatus::Verdict(verdict)
                }
                Ok(None) => {
                    tally.inspected += 1;
                    UrlStatus::Unknown
                }
                Err(err) => {
                    tally.errors += 1;
                    tracing::warn!(url = %url, error = %err, "inspection failed");
                    err.tag()
                }
            };
            records.push(self.result_record(message, url, status));
        }

        Scan {
            tally,
            records,
            truncated,
            taken_over,
        }
    }

    async fn reindex_all(
        &self,
        message: &TaskMessage,
        client: &dyn SearchConsole,
        mut beat: Heartbeat,
    ) -> Scan {
        let mut tally = ScanTally::new(message.urls.len() as u32);
        let mut records = Vec::with_capacity(message.urls.len());
        let mut truncated = false;
        let mut taken_over = false;
        let started = Instant::now();

        for url in &message.urls {
            if self.deadline_reached(started) {
                tracing::warn!(processed = tally.inspected + tally.errors, "run deadline reached; stopping");
                truncated = true;
                break;
            }
            if !self.keep_alive(&mut beat).await {
                taken_over = true;
                break;
            }
            self.pacing.wait().await;

            match client.request_reindex(url).await {
                Ok(()) => {
                    tally.inspected += 1;
                    records.push(self.result_record(message, url, UrlStatus::ReindexRequested));
                }
                Err(err) => {
                    // the previous verdict stays, so the url is picked up again next time
                    tally.errors += 1;
                    tracing::warn!(url = %url, error = %err, "reindex request failed");
                }
            }
        }

        Scan {
            tally,
            records,
            truncated,
            taken_over,
        }
    }

    fn result_record(&self, message: &TaskMessage, url: &str, status: UrlStatus) -> ResultRecord {
        ResultRecord {
            owner_id: message.owner_id.clone(),
            property_id: message.property_id.clone(),
            property_url: message.property_url.clone(),
            url: url.to_string(),
            status,
            last_checked_at: self.clock.now(),
        }
    }

    async fn update_summary(&self, message: &TaskMessage, record: &JobRecord, tally: &ScanTally) {
        let (indexed, total) = match message.action {
            JobAction::Check => (tally.indexed, tally.inspected + tally.errors),
            JobAction::Reindex => {
                match self
                    .results
                    .list_for_property(&message.owner_id, &message.property_id)
                    .await
                {
                    Ok(all) => (
                        all.iter().filter(|r| r.status.is_pass_like()).count() as u32,
                        all.len() as u32,
                    ),
                    Err(err) => {
                        tracing::warn!(error = %err, "could not count results; summary not updated");
                        return;
                    }
                }
            }
        };

        let summary = PropertySummary {
            indexed,
            total,
            last_scan_status: record.status.as_str().to_string(),
            last_scan_message: record.message.clone(),
            last_scan_at: self.clock.now(),
        };
        match self
            .properties
            .update_property_summary(&message.property_id, summary)
            .await
        {
            Ok(()) => {}
            Err(StoreError::NotFound(_)) => {
                tracing::warn!(property_id = %message.property_id, "property no longer exists; summary skipped");
            }
            Err(err) => {
                tracing::warn!(property_id = %message.property_id, error = %err, "property summary not updated");
            }
        }
    }
}

fn summary_message(
    action: JobAction,
    tally: &ScanTally,
    truncated: bool,
    storage_error: Option<&StoreError>,
) -> String {
    let processed = tally.inspected + tally.errors;
    let mut text = match action {
        JobAction::Check => format!(
            "Checked {processed} URLs. Found {} indexed or neutral.",
            tally.indexed
        ),
        JobAction::Reindex => format!(
            "Requested re-indexing for {} of {} URLs.",
            tally.inspected, tally.requested
        ),
    };
    if tally.errors > 0 {
        text.push_str(&format!(" {} URLs failed with API errors.", tally.errors));
    }
    if truncated {
        text.push_str(&format!(
            " Stopped at the run deadline; {} URLs were not processed.",
            tally.requested.saturating_sub(processed)
        ));
    }
    if let Some(err) = storage_error {
        text.push_str(&format!(" Results could not be saved: {err}."));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::clean(JobAction::Check, ScanTally { requested: 10, inspected: 10, indexed: 10, errors: 0 }, false, "Checked 10 URLs. Found 10 indexed or neutral.")]
    #[case::errors(JobAction::Check, ScanTally { requested: 10, inspected: 7, indexed: 3, errors: 3 }, false, "Checked 10 URLs. Found 3 indexed or neutral. 3 URLs failed with API errors.")]
    #[case::truncated(JobAction::Check, ScanTally { requested: 10, inspected: 4, indexed: 4, errors: 0 }, true, "Checked 4 URLs. Found 4 indexed or neutral. Stopped at the run deadline; 6 URLs were not processed.")]
    #[case::reindex(JobAction::Reindex, ScanTally { requested: 5, inspected: 4, indexed: 0, errors: 1 }, false, "Requested re-indexing for 4 of 5 URLs. 1 URLs failed with API errors.")]
    fn messages_describe_the_run(
        #[case] action: JobAction,
        #[case] tally: ScanTally,
        #[case] truncated: bool,
        #[case] expected: &str,
    ) {
        assert_eq!(summary_message(action, &tally, truncated, None), expected);
    }

    #[test]
    fn storage_failure_is_mentioned() {
        let tally = ScanTally {
            requested: 1,
            inspected: 1,
            indexed: 1,
            errors: 0,
        };
        let err = StoreError::Unavailable("down".into());
        let text = summary_message(JobAction::Check, &tally, false, Some(&err));
        assert!(text.ends_with("Results could not be saved: store unavailable: down."));
    }

    #[rstest]
    #[case::store_down(WorkerError::Store(StoreError::Unavailable("x".into())), true)]
    #[case::ledger_down(WorkerError::Ledger(LedgerError::Storage("x".into())), true)]
    #[case::job_missing(WorkerError::Store(StoreError::NotFound("job".into())), false)]
    #[case::no_account(WorkerError::Ledger(LedgerError::AccountNotFound(crate::domain::OwnerId::new("u"))), false)]
    fn outages_are_retryable(#[case] err: WorkerError, #[case] retryable: bool) {
        assert_eq!(err.is_retryable(), retryable);
    }

    #[test]
    fn undecodable_message_is_not_retryable() {
        let decode = TaskMessage::decode(b"nope").unwrap_err();
        assert!(!WorkerError::Decode(decode).is_retryable());
    }
}
