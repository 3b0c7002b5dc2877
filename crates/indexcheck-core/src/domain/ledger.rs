//! Credit journal entries and purchasable packages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{JobId, OwnerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerReason {
    /// Charge taken by a worker for a job.
    Usage,
    /// Compensation for a charge whose work could not be performed.
    Refund,
    /// Credits bought through the payment gateway.
    Purchase,
}

/// One balance mutation. `delta` is negative for debits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub owner_id: OwnerId,
    pub job_id: Option<JobId>,
    pub delta: i64,
    pub reason: LedgerReason,
    pub note: Option<String>,
    pub at: DateTime<Utc>,
}

/// A credit package the payment gateway can sell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditPackage {
    pub id: String,
    pub name: String,
    pub credits: u64,
    /// Price in minor currency units.
    pub price: u64,
}
