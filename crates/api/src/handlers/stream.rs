//! Server-sent status streams.
//!
//! Each connection gets its own polled stream; nothing is shared between
//! connections and dropping one never affects the request it watches.

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use unsub_core::types::DbId;
use unsub_orchestrator::StatusEvent;

use crate::error::AppResult;
use crate::middleware::auth::AuthUser;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamQuery {
    /// Echoed in every event; defaults to the request's own orchestration.
    pub orchestration_id: Option<DbId>,
}

/// GET /api/v1/cancellations/{id}/stream
///
/// Emits `cancellation.status` once, then `cancellation.update` whenever the
/// status or latest log changes, and closes after the terminal event.
pub async fn stream_status(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Query(query): Query<StreamQuery>,
) -> AppResult<Sse<impl Stream<Item = Result<Event, axum::Error>>>> {
    let stream = state
        .publisher
        .open_stream(id, auth.user_id, query.orchestration_id)
        .await?;

    tracing::info!(request_id = id, user_id = auth.user_id, "Status stream connected");
    Ok(Sse::new(stream.map(|event| to_sse(&event))).keep_alive(KeepAlive::default()))
}

fn to_sse(event: &StatusEvent) -> Result<Event, axum::Error> {
    Event::default().event(event.name()).json_data(event)
}
