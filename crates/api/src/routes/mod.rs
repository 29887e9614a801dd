pub mod cancellations;
pub mod health;
pub mod orchestrations;

use std::time::Duration;

use axum::http::StatusCode;
use axum::Router;
use tower_http::timeout::TimeoutLayer;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /cancellations                        submit (POST)
/// /cancellations/batch                  submit a batch (POST)
/// /cancellations/{id}                   get
/// /cancellations/{id}/logs              audit trail
/// /cancellations/{id}/cancel            withdraw (POST)
/// /cancellations/{id}/stream            SSE status stream
///
/// /orchestrations/{id}                  aggregate status
/// ```
///
/// `request_timeout` applies to every route except the status stream,
/// which stays open until the request reaches a terminal status.
pub fn api_routes(request_timeout: Duration) -> Router<AppState> {
    Router::new()
        .nest("/cancellations", cancellations::router())
        .nest("/orchestrations", orchestrations::router())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ))
        .merge(cancellations::stream_router())
}
