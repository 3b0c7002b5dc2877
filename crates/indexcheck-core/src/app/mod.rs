//! Application layer: the pipeline components built on top of the ports.
//!
//! - [`Dispatcher`]: validates a request, collects URLs, prechecks credits,
//!   records a pending job and publishes its task message
//! - [`TaskWorker`]: runs one task message through the job state machine
//! - [`ConsumerGroup`]: N consumers feeding the queue into the worker
//! - [`Reconciler`]: fails and refunds jobs nobody will finish
//! - [`PurchaseService`], [`JobStatusQuery`]: the remaining caller surface
//! - [`PipelineBuilder`]: wiring

pub mod auth;
pub mod builder;
pub mod collector;
pub mod consumer;
pub mod dispatcher;
pub mod ledger;
pub mod purchase;
pub mod reconciler;
pub mod status;
pub mod worker;


pub use self::auth::{AuthenticatedClient, Authenticator};
pub use self::builder::{BuildError, Pipeline, PipelineBuilder};
pub use self::collector::{Collected, UrlCollector};
pub use self::consumer::ConsumerGroup;
pub use self::dispatcher::{Dispatcher, Pricing, StartRequest, StartResponse, StartStatus};
pub use self::ledger::CreditLedger;
pub use self::purchase::{PurchaseReceipt, PurchaseRequest, PurchaseService};
pub use self::reconciler::{Reconciler, SweepReport};
pub use self::status::JobStatusQuery;
pub use self::worker::{RunOutcome, TaskWorker, WorkerError};
