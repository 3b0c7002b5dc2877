//! Adapters behind the ports.
//!
//! `memory_*` and `scripted` are in-process stand-ins for tests and the demo
//! binary; `google` talks to the real APIs over HTTP.

pub mod google;
pub mod memory_directory;
pub mod memory_jobs;
pub mod memory_ledger;
pub mod memory_queue;
pub mod memory_results;
pub mod pacing;
pub mod scripted;

pub use google::{http_client, GoogleClientFactory, GoogleSearchConsole, GoogleTokenEndpoint};
pub use memory_directory::InMemoryDirectory;
pub use memory_jobs::InMemoryJobStore;
pub use memory_ledger::InMemoryLedger;
pub use memory_queue::{InMemoryQueue, QueueDepth, RedeliveryPolicy};
pub use memory_results::InMemoryResultStore;
pub use pacing::{SerialDelay, TokenBucket};
pub use scripted::{
    InMemoryPaymentGateway, ScriptedClientFactory, ScriptedConsole, ScriptedReply,
    ScriptedTokenEndpoint,
};
