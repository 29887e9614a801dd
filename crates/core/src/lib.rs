//! Domain primitives shared by every unsub crate.
//!
//! Nothing in here performs I/O: the status state machine, strategy
//! selection, orchestration aggregation and retry backoff are plain
//! functions so they can be unit-tested in isolation.

pub mod cancellation;
pub mod error;
pub mod retry;
pub mod stream_events;
pub mod types;
