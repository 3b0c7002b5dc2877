//! Property summary written back after each run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Aggregate counters shown for a property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertySummary {
    pub indexed: u32,
    pub total: u32,
    pub last_scan_status: String,
    pub last_scan_message: String,
    pub last_scan_at: DateTime<Utc>,
}
