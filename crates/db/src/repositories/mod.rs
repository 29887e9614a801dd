//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that
//! accept `&PgPool` (or a transaction connection) as the first argument.

pub mod cancellation_log_repo;
pub mod cancellation_request_repo;
pub mod orchestration_repo;

pub use cancellation_log_repo::CancellationLogRepo;
pub use cancellation_request_repo::CancellationRequestRepo;
pub use orchestration_repo::OrchestrationRepo;
