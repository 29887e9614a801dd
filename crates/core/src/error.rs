//! Domain error shared by every layer above `unsub_core`.

use crate::cancellation::CancellationStatus;
use crate::types::DbId;

/// Cancellation-domain error type.
///
/// The API layer maps each variant onto an HTTP status; lower layers only
/// pick the variant.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: DbId },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// A status change that has no edge in the request state machine.
    #[error("Cannot move cancellation request from {from} to {to}")]
    InvalidTransition {
        from: CancellationStatus,
        to: CancellationStatus,
    },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// `NotFound` for a cancellation request the caller cannot see.
    pub fn request_not_found(id: DbId) -> Self {
        CoreError::NotFound {
            entity: "cancellation_request",
            id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_transition_names_both_statuses() {
        let err = CoreError::InvalidTransition {
            from: CancellationStatus::Completed,
            to: CancellationStatus::Cancelled,
        };
        assert_eq!(
            err.to_string(),
            "Cannot move cancellation request from completed to cancelled"
        );
    }

    #[test]
    fn request_not_found_uses_request_entity() {
        let err = CoreError::request_not_found(9);
        assert_eq!(
            err.to_string(),
            "Entity not found: cancellation_request with id 9"
        );
    }
}
