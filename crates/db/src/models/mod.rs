//! Domain model structs and DTOs.
//!
//! Row structs decode the text-encoded status/method/level columns into
//! the `unsub_core::cancellation` enums.

pub mod cancellation;

pub use cancellation::{
    CancellationLog, CancellationRequest, NewCancellationRequest, NewLogEntry, Orchestration,
    Submission,
};
