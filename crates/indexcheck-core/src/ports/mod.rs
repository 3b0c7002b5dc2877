//! Ports: the traits every collaborator of the pipeline is reached through.
//!
//! Dispatcher and worker take these as injected `Arc<dyn ...>` handles; the
//! `impls` module provides in-memory adapters for tests and the demo binary,
//! and HTTP adapters for the external API.

pub mod auth;
pub mod clock;
pub mod directory;
pub mod id_generator;
pub mod job_store;
pub mod ledger;
pub mod pacing;
pub mod payment;
pub mod queue;
pub mod result_store;
pub mod search_console;

pub use self::auth::{AuthError, ClientFactory, RefreshedToken, TokenEndpoint};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::directory::{CredentialDirectory, PropertyDirectory};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::job_store::{Claim, JobStore, StoreError};
pub use self::ledger::{LedgerError, LedgerStore};
pub use self::pacing::Pacing;
pub use self::payment::{PaymentError, PaymentGateway};
pub use self::queue::{Delivery, MessageQueue, QueueError};
pub use self::result_store::ResultStore;
pub use self::search_console::{ApiError, DiscoverySource, SearchConsole};
