use axum::routing::get;
use axum::Router;

use crate::handlers::cancellations;
use crate::state::AppState;

/// Routes mounted at `/orchestrations`.
///
/// ```text
/// GET    /{id}            -> get_orchestration
/// ```
pub fn router() -> Router<AppState> {
    Router::new().route("/{id}", get(cancellations::get_orchestration))
}
