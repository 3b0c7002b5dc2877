//! Credit ledger service on top of the [`LedgerStore`] port.
//!
//! Debits fail closed. Refunds are best effort: a failed refund is logged at
//! error level and never turned into a caller-visible failure, since it only
//! runs on paths that are already reporting a failure of their own.

use std::sync::Arc;

use crate::domain::{JobId, LedgerEntry, LedgerReason, OwnerId};
use crate::ports::{Clock, LedgerError, LedgerStore};

pub struct CreditLedger {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
}

fn signed(amount: u64) -> Result<i64, LedgerError> {
    i64::try_from(amount).map_err(|_| LedgerError::Storage(format!("amount {amount} out of range")))
}

impl CreditLedger {
    pub fn new(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn balance(&self, owner: &OwnerId) -> Result<u64, LedgerError> {
        self.store.balance(owner).await
    }

    /// Read-only check that `amount` is currently covered. May race with
    /// concurrent debits; the debit itself re-checks.
    pub async fn precheck(&self, owner: &OwnerId, amount: u64) -> Result<(), LedgerError> {
        let available = self.store.balance(owner).await?;
        if available < amount {
            return Err(LedgerError::InsufficientFunds {
                required: amount,
                available,
            });
        }
        Ok(())
    }

    /// Atomic read-check-write. Zero is a logged no-op.
    pub async fn debit(&self, owner: &OwnerId, job_id: JobId, amount: u64) -> Result<(), LedgerError> {
        if amount == 0 {
            tracing::info!(owner = %owner, job_id = %job_id, "no credits to debit");
            return Ok(());
        }
        let balance = self
            .store
            .apply(LedgerEntry {
                owner_id: owner.clone(),
                job_id: Some(job_id),
                delta: -signed(amount)?,
                reason: LedgerReason::Usage,
                note: None,
                at: self.clock.now(),
            })
            .await?;
        tracing::info!(owner = %owner, job_id = %job_id, amount, balance, "credits debited");
        Ok(())
    }

    /// Give `amount` back. Returns whether the refund was applied.
    pub async fn refund(&self, owner: &OwnerId, job_id: JobId, amount: u64, note: &str) -> bool {
        if amount == 0 {
            tracing::info!(owner = %owner, job_id = %job_id, "no credits to refund");
            return true;
        }
        let delta = match signed(amount) {
            Ok(d) => d,
            Err(err) => {
                tracing::error!(owner = %owner, job_id = %job_id, amount, error = %err, "refund failed");
                return false;
            }
        };
        let entry = LedgerEntry {
            owner_id: owner.clone(),
            job_id: Some(job_id),
            delta,
            reason: LedgerReason::Refund,
            note: Some(note.to_string()),
            at: self.clock.now(),
        };
        match self.store.apply(entry).await {
            Ok(balance) => {
                tracing::info!(owner = %owner, job_id = %job_id, amount, balance, note, "credits refunded");
                true
            }
            Err(err) => {
                tracing::error!(
                    owner = %owner,
                    job_id = %job_id,
                    amount,
                    error = %err,
                    "refund failed; credits must be restored manually"
                );
                false
            }
        }
    }

    /// Add purchased credits. Returns the new balance.
    pub async fn grant(&self, owner: &OwnerId, amount: u64, note: String) -> Result<u64, LedgerError> {
        let balance = self
            .store
            .apply(LedgerEntry {
                owner_id: owner.clone(),
                job_id: None,
                delta: signed(amount)?,
                reason: LedgerReason::Purchase,
                note: Some(note),
                at: self.clock.now(),
            })
            .await?;
        tracing::info!(owner = %owner, amount, balance, "credits granted");
        Ok(balance)
    }

    /// Sum of every journal delta recorded against `job_id`.
    pub async fn net_for_job(&self, owner: &OwnerId, job_id: JobId) -> Result<i64, LedgerError> {
        Ok(self
            .store
            .journal(owner)
            .await?
            .iter()
            .filter(|e| e.job_id == Some(job_id))
            .map(|e| e.delta)
            .sum())
    }

    pub async fn journal(&self, owner: &OwnerId) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.store.journal(owner).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryLedger;
    use crate::ports::SystemClock;
    use ulid::Ulid;

    async fn ledger(credits: u64) -> (CreditLedger, Arc<InMemoryLedger>) {
        let store = Arc::new(InMemoryLedger::new());
        store.open_account(OwnerId::new("u"), credits).await;
        (CreditLedger::new(store.clone(), Arc::new(SystemClock)), store)
    }

    #[tokio::test]
    async fn precheck_reports_shortfall() {
        let (ledger, _) = ledger(5).await;
        let err = ledger.precheck(&OwnerId::new("u"), 10).await.unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientFunds {
                required: 10,
                available: 5
            }
        );
        assert!(ledger.precheck(&OwnerId::new("u"), 5).await.is_ok());
    }

    #[tokio::test]
    async fn debit_then_refund_nets_to_zero() {
        let (ledger, _) = ledger(20).await;
        let owner = OwnerId::new("u");
        let job = JobId::from_ulid(Ulid::new());

        ledger.debit(&owner, job, 10).await.unwrap();
        assert_eq!(ledger.balance(&owner).await.unwrap(), 10);
        assert_eq!(ledger.net_for_job(&owner, job).await.unwrap(), -10);

        assert!(ledger.refund(&owner, job, 10, "auth failed").await);
        assert_eq!(ledger.balance(&owner).await.unwrap(), 20);
        assert_eq!(ledger.net_for_job(&owner, job).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn zero_amounts_do_not_touch_the_journal() {
        let (ledger, _) = ledger(1).await;
        let owner = OwnerId::new("u");
        let job = JobId::from_ulid(Ulid::new());

        ledger.debit(&owner, job, 0).await.unwrap();
        assert!(ledger.refund(&owner, job, 0, "nothing").await);
        assert!(ledger.journal(&owner).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn refund_failure_is_swallowed() {
        let (ledger, store) = ledger(1).await;
        store.set_unavailable(true);
        let applied = ledger
            .refund(&OwnerId::new("u"), JobId::from_ulid(Ulid::new()), 3, "x")
            .await;
        assert!(!applied);
    }

    #[tokio::test]
    async fn grant_is_journaled_without_a_job() {
        let (ledger, _) = ledger(0).await;
        let owner = OwnerId::new("u");
        let balance = ledger.grant(&owner, 100, "order_1".into()).await.unwrap();
        assert_eq!(balance, 100);

        let journal = ledger.journal(&owner).await.unwrap();
        assert_eq!(journal.len(), 1);
        assert_eq!(journal[0].reason, LedgerReason::Purchase);
        assert_eq!(journal[0].job_id, None);
    }
}
