//! In-memory ledger.
//!
//! One tokio `Mutex` guards every account, so `apply` is a single critical
//! section: read, check, write and journal happen without an `.await` in
//! between.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{LedgerEntry, OwnerId};
use crate::ports::{LedgerError, LedgerStore};

#[derive(Debug, Default)]
struct Account {
    balance: u64,
    journal: Vec<LedgerEntry>,
}

#[derive(Debug, Default)]
pub struct InMemoryLedger {
    accounts: Mutex<HashMap<OwnerId, Account>>,
    unavailable: AtomicBool,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or reset) an account with an opening balance.
    pub async fn open_account(&self, owner: OwnerId, credits: u64) {
        let mut accounts = self.accounts.lock().await;
        accounts.insert(
            owner,
            Account {
                balance: credits,
                journal: Vec::new(),
            },
        );
    }

    /// Make every call fail with `LedgerError::Storage` until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), LedgerError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LedgerError::Storage("ledger unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn balance(&self, owner: &OwnerId) -> Result<u64, LedgerError> {
        self.check_available()?;
        let accounts = self.accounts.lock().await;
        accounts
            .get(owner)
            .map(|a| a.balance)
            .ok_or_else(|| LedgerError::AccountNotFound(owner.clone()))
    }

    async fn apply(&self, entry: LedgerEntry) -> Result<u64, LedgerError> {
        self.check_available()?;
        let mut accounts = self.accounts.lock().await;
        let account = accounts
            .get_mut(&entry.owner_id)
            .ok_or_else(|| LedgerError::AccountNotFound(entry.owner_id.clone()))?;

        let magnitude = entry.delta.unsigned_abs();
        account.balance = if entry.delta < 0 {
            account
                .balance
                .checked_sub(magnitude)
                .ok_or(LedgerError::InsufficientFunds {
                    required: magnitude,
                    available: account.balance,
                })?
        } else {
            account.balance.saturating_add(magnitude)
        };
        account.journal.push(entry);
        Ok(account.balance)
    }

    async fn journal(&self, owner: &OwnerId) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.check_available()?;
        let accounts = self.accounts.lock().await;
        accounts
            .get(owner)
            .map(|a| a.journal.clone())
            .ok_or_else(|| LedgerError::AccountNotFound(owner.clone()))
    }
}
