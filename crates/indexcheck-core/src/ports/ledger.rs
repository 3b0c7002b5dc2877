//! Ledger port: per-account credit balances.
//!
//! `apply` is the only balance mutation. It must be atomic per account
//! (read, check, write and journal in one transaction) and fail closed when a
//! negative delta would take the balance below zero.

use async_trait::async_trait;

use crate::domain::{LedgerEntry, OwnerId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("insufficient credits: required {required}, available {available}")]
    InsufficientFunds { required: u64, available: u64 },

    #[error("account not found: {0}")]
    AccountNotFound(OwnerId),

    #[error("ledger storage: {0}")]
    Storage(String),
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Current balance.
    async fn balance(&self, owner: &OwnerId) -> Result<u64, LedgerError>;

    /// Apply `entry.delta` and journal the entry. Returns the new balance.
    async fn apply(&self, entry: LedgerEntry) -> Result<u64, LedgerError>;

    /// Journal of all entries for an account, oldest first.
    async fn journal(&self, owner: &OwnerId) -> Result<Vec<LedgerEntry>, LedgerError>;
}
