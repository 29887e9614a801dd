//! Event names and event-bus types emitted for cancellation requests.
//!
//! The `EVENT_*` names are the `event:` field of the SSE status stream;
//! the `BUS_*` names are the `PlatformEvent::event_type` values handed to
//! the notification dispatcher.

/// Snapshot sent once, immediately after a status stream is opened.
pub const EVENT_STATUS: &str = "cancellation.status";

/// Sent whenever the polled view of a request changes.
pub const EVENT_UPDATE: &str = "cancellation.update";

/// A request reached `completed`.
pub const BUS_CANCELLATION_COMPLETED: &str = "cancellation.completed";

/// A request reached `failed`.
pub const BUS_CANCELLATION_FAILED: &str = "cancellation.failed";

/// A request was cancelled by its owner.
pub const BUS_CANCELLATION_CANCELLED: &str = "cancellation.cancelled";
