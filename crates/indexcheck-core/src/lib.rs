//! indexcheck-core
//!
//! Credit-metered URL index checking. A caller asks for a property to be
//! checked (or re-indexed); the dispatcher collects its URLs, prechecks the
//! owner's credits and queues a task message. Workers charge the credits,
//! call the external inspection API once per URL and persist the results.
//!
//! # Modules
//! - **domain**: ids, job and result records, task message, ledger entries, error taxonomy
//! - **ports**: traits for every collaborator (ledger, stores, queue, external API, clock)
//! - **app**: dispatcher, worker, consumer group, reconciler, purchases, status, builder
//! - **impls**: in-memory adapters, scripted fakes, pacing, HTTP adapters
//! - **config**: TOML + environment configuration
//! - **observability**: tracing subscriber setup

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;
