//! Cancellation orchestration.
//!
//! - [`executor`]: the API, automation and manual strategies and the
//!   bounded automation session pool.
//! - [`orchestrator`]: the request state machine, retry/backoff and
//!   strategy fallback.
//! - [`publisher`]: polled status streams for clients.
//! - [`dispatcher`] / [`reaper`]: background loops that pick up orphaned
//!   `pending` requests and fail stale `in_progress` ones.
//! - [`bootstrap`]: executor and catalog wiring for the binaries.

pub mod bootstrap;
pub mod catalog;
pub mod config;
pub mod dispatcher;
pub mod executor;
pub mod notify;
pub mod orchestrator;
pub mod publisher;
pub mod reaper;

pub use catalog::{StaticCatalog, Subscription, SubscriptionCatalog};
pub use config::OrchestratorConfig;
pub use orchestrator::{Executors, Orchestrator, RunOutcome};
pub use publisher::{StatusEvent, StatusPublisher};
