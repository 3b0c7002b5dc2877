//! Reconciler: finalizes job records that no worker will finish.
//!
//! A record stays `pending` when its message never reached a worker, and
//! `processing` when the worker died mid-run (a redelivery sees the claim and
//! backs off). Both are failed once they have not been touched for
//! `stale_after`; a running worker refreshes `updated_at` well within that.
//!
//! Any net charge found in the ledger journal for the job is refunded, so the
//! per-job net is zero, unless the record shows the per-URL loop had started.
//! Those external calls were made, so the charge is kept.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use super::ledger::CreditLedger;
use crate::domain::{JobRecord, JobStatus};
use crate::ports::{Clock, JobStore, StoreError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub finalized: usize,
    pub refunded_credits: u64,
}

pub struct Reconciler {
    jobs: Arc<dyn JobStore>,
    ledger: Arc<CreditLedger>,
    clock: Arc<dyn Clock>,
    stale_after: chrono::Duration,
}

impl Reconciler {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        ledger: Arc<CreditLedger>,
        clock: Arc<dyn Clock>,
        stale_after: chrono::Duration,
    ) -> Self {
        Self {
            jobs,
            ledger,
            clock,
            stale_after,
        }
    }

    pub async fn sweep(&self) -> Result<SweepReport, StoreError> {
        let cutoff = self.clock.now() - self.stale_after;
        let stale = self.jobs.list_stale(cutoff).await?;
        let mut report = SweepReport::default();

        for record in stale {
            if let Some(refunded) = self.finalize_stale(record).await {
                report.finalized += 1;
                report.refunded_credits += refunded;
            }
        }
        if report.finalized > 0 {
            tracing::info!(
                finalized = report.finalized,
                refunded_credits = report.refunded_credits,
                "reconciler sweep"
            );
        }
        Ok(report)
    }

    /// Returns the refunded amount, or `None` when the record was left alone.
    async fn finalize_stale(&self, mut record: JobRecord) -> Option<u64> {
        let job_id = record.id;
        let owner = record.owner_id.clone();

        let net = match self.ledger.net_for_job(&owner, job_id).await {
            Ok(net) => net,
            Err(err) => {
                tracing::warn!(job_id = %job_id, error = %err, "ledger unreadable; job left for next sweep");
                return None;
            }
        };
        let seen = record.updated_at;
        let now = self.clock.now();
        let transition = if record.work_started_at.is_some() {
            record.fail(
                "stale_processing: the worker stopped after external calls began; credits were kept.",
                now,
            )
            .map(|()| 0)
        } else {
            let owed = u64::try_from(-net).unwrap_or(0);
            let reason = match record.status {
                JobStatus::Pending => "stale_pending: the job was never picked up",
                _ => "stale_processing: the worker did not finish",
            };
            let message = if owed > 0 {
                format!("{reason}; {owed} credits refunded.")
            } else {
                format!("{reason}.")
            };
            record
                .record_refund(now)
                .and_then(|()| record.fail(message, now))
                .map(|()| owed)
        };
        let owed = match transition {
            Ok(owed) => owed,
            Err(err) => {
                tracing::warn!(job_id = %job_id, error = %err, "stale job not finalized");
                return None;
            }
        };

        // terminal before refunding: a late worker save now conflicts, and a
        // worker that touched the record since it was listed wins
        match self.jobs.save_if_unchanged(&record, seen).await {
            Ok(()) => {}
            Err(StoreError::Conflict(_)) => return None,
            Err(err) => {
                tracing::warn!(job_id = %job_id, error = %err, "stale job not finalized");
                return None;
            }
        }
        if owed > 0 {
            self.ledger
                .refund(&owner, job_id, owed, "stale job finalized by reconciler")
                .await;
        }
        tracing::warn!(
            job_id = %job_id,
            owner = %owner,
            refunded = owed,
            kept = record.credits_used,
            "stale job failed"
        );
        Some(owed)
    }

    /// Sweep every `interval` until shutdown is signalled.
    pub async fn run(self: Arc<Self>, interval: Duration, mut shutdown_rx: watch::Receiver<bool>) {
        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            if let Err(err) = self.sweep().await {
                tracing::warn!(error = %err, "reconciler sweep failed");
            }
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(interval) => {},
            }
        }
    }
}
