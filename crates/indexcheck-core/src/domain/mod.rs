//! Domain model: ids, job and result records, the task message, credentials,
//! ledger entries and the caller-facing error taxonomy.

pub mod credential;
pub mod errors;
pub mod ids;
pub mod job;
pub mod ledger;
pub mod message;
pub mod property;
pub mod result;

pub use credential::{CredentialBundle, StoredCredential};
pub use errors::{ErrorCode, PipelineError};
pub use ids::{DeliveryId, JobId, OwnerId, PropertyId};
pub use job::{
    JobAction, JobOutcome, JobRecord, JobStatus, JobTransitionError, NewJob, ScanTally,
};
pub use ledger::{CreditPackage, LedgerEntry, LedgerReason};
pub use message::{CodecError, TaskMessage};
pub use property::PropertySummary;
pub use result::{ResultKey, ResultRecord, UrlStatus, Verdict};
