//! Route definitions for the `/cancellations` resource.
//!
//! All endpoints require authentication.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::{cancellations, stream};
use crate::state::AppState;

/// Routes mounted at `/cancellations`.
///
/// ```text
/// POST   /                -> submit_cancellation
/// POST   /batch           -> submit_batch
/// GET    /{id}            -> get_cancellation
/// GET    /{id}/logs       -> list_logs
/// POST   /{id}/cancel     -> cancel_cancellation
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(cancellations::submit_cancellation))
        .route("/batch", post(cancellations::submit_batch))
        .route("/{id}", get(cancellations::get_cancellation))
        .route("/{id}/logs", get(cancellations::list_logs))
        .route("/{id}/cancel", post(cancellations::cancel_cancellation))
}

/// The long-lived stream route, kept apart so it can sit outside the
/// request timeout.
pub fn stream_router() -> Router<AppState> {
    Router::new().route("/cancellations/{id}/stream", get(stream::stream_status))
}
