//! Integration tests for the SSE status stream.

mod common;

use std::time::Duration;

use axum::http::{Method, StatusCode};
use common::{body_text, build_test_app, get, send, ProviderMode, OTHER_USER, USER};
use unsub_core::cancellation::{CancellationMethod, CancellationStatus, MethodSelection};
use unsub_db::models::{CancellationRequest, NewCancellationRequest, NewLogEntry};
use unsub_db::{CancellationStore, MemoryCancellationStore};

async fn seed(store: &MemoryCancellationStore) -> CancellationRequest {
    store
        .submit(&NewCancellationRequest {
            user_id: USER,
            subscription_id: "sub-42".to_string(),
            orchestration_id: None,
            method: MethodSelection::Pinned(CancellationMethod::Api),
        })
        .await
        .unwrap()
        .request
}

/// `data:` payloads of every event with the given name.
fn payloads(body: &str, event: &str) -> Vec<serde_json::Value> {
    body.split("\n\n")
        .filter(|block| block.lines().any(|l| l == format!("event: {event}")))
        .filter_map(|block| block.lines().find_map(|l| l.strip_prefix("data: ")))
        .map(|data| serde_json::from_str(data).unwrap())
        .collect()
}

#[tokio::test]
async fn terminal_request_gets_one_snapshot_and_closes() {
    let app = build_test_app(ProviderMode::Healthy);
    let token = app.token(USER);
    let request = seed(&app.store).await;
    app.store
        .cancel(request.id, USER, &NewLogEntry::info("cancellation withdrawn by user"))
        .await
        .unwrap();

    let response = get(&app, &format!("/api/v1/cancellations/{}/stream", request.id), &token).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "text/event-stream"
    );

    let body = body_text(response).await;
    let snapshots = payloads(&body, "cancellation.status");
    assert_eq!(snapshots.len(), 1);
    assert!(payloads(&body, "cancellation.update").is_empty());

    let snapshot = &snapshots[0];
    assert_eq!(snapshot["type"], "cancellation.status");
    assert_eq!(snapshot["requestId"], request.id);
    assert_eq!(snapshot["status"], "cancelled");
    assert_eq!(snapshot["method"], "api");
}

#[tokio::test]
async fn stream_requires_owner() {
    let app = build_test_app(ProviderMode::Healthy);
    let request = seed(&app.store).await;
    let uri = format!("/api/v1/cancellations/{}/stream", request.id);

    let response = send(&app, Method::GET, &uri, None, None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = get(&app, &uri, &app.token(OTHER_USER)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = get(&app, "/api/v1/cancellations/999/stream", &app.token(USER)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test(start_paused = true)]
async fn live_stream_ends_with_terminal_update() {
    let app = build_test_app(ProviderMode::Healthy);
    let token = app.token(USER);
    let request = seed(&app.store).await;
    app.store.claim(request.id).await.unwrap().unwrap();

    let store = app.store.clone();
    let id = request.id;
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(3)).await;
        store
            .record_attempt(
                id,
                &NewLogEntry::info("attempt 1 succeeded"),
                Some(CancellationStatus::Completed),
            )
            .await
            .unwrap();
    });

    let response = get(
        &app,
        &format!("/api/v1/cancellations/{id}/stream?orchestrationId=55"),
        &token,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_text(response).await;

    let snapshots = payloads(&body, "cancellation.status");
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0]["status"], "in_progress");
    assert_eq!(snapshots[0]["orchestrationId"], 55);

    let updates = payloads(&body, "cancellation.update");
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0]["status"], "completed");
    assert_eq!(updates[0]["lastLog"]["message"], "attempt 1 succeeded");
    assert_eq!(updates[0]["orchestrationId"], 55);
}
