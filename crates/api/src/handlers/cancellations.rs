//! Handlers for the `/cancellations` and `/orchestrations` resources.
//!
//! All endpoints require authentication via [`AuthUser`] and only ever
//! expose the caller's own requests; someone else's request is reported as
//! not found.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use unsub_core::cancellation::{CancellationStatus, MethodSelection};
use unsub_core::types::DbId;
use unsub_db::models::CancellationRequest;
use unsub_orchestrator::orchestrator::BatchItem;
use validator::Validate;

use crate::error::AppResult;
use crate::middleware::auth::AuthUser;
use crate::response::DataResponse;
use crate::state::AppState;

/// Most subscriptions accepted in one batch.
const MAX_BATCH_SIZE: u64 = 50;

/// Request body for `POST /cancellations` and each member of a batch.
#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SubmitCancellation {
    #[validate(length(min = 1, max = 255))]
    pub subscription_id: String,
    /// `auto` when omitted.
    #[serde(default)]
    pub method: MethodSelection,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SubmitBatch {
    #[validate(length(min = 1, max = MAX_BATCH_SIZE), nested)]
    pub items: Vec<SubmitCancellation>,
}

#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub orchestration_id: DbId,
    pub requests: Vec<CancellationRequest>,
}

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// POST /api/v1/cancellations
///
/// Returns 201 with a new `pending` request, or 200 with the request that
/// is already active for the subscription. Execution starts in the
/// background; progress is observed via the status stream.
pub async fn submit_cancellation(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(input): Json<SubmitCancellation>,
) -> AppResult<impl IntoResponse> {
    input.validate()?;

    let submission = state
        .orchestrator
        .submit(auth.user_id, &input.subscription_id, input.method)
        .await?;
    start_if_pending(&state, &submission.request);

    let status = if submission.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(DataResponse {
            data: submission.request,
        }),
    ))
}

/// POST /api/v1/cancellations/batch
///
/// Submit several subscriptions under one orchestration. Nothing is
/// written unless every subscription is known.
pub async fn submit_batch(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(input): Json<SubmitBatch>,
) -> AppResult<impl IntoResponse> {
    input.validate()?;

    let items: Vec<BatchItem> = input
        .items
        .into_iter()
        .map(|item| BatchItem {
            subscription_id: item.subscription_id,
            method: item.method,
        })
        .collect();
    let batch = state.orchestrator.submit_batch(auth.user_id, &items).await?;

    let requests: Vec<CancellationRequest> = batch
        .submissions
        .into_iter()
        .map(|s| s.request)
        .collect();
    for request in &requests {
        start_if_pending(&state, request);
    }

    Ok((
        StatusCode::CREATED,
        Json(DataResponse {
            data: BatchResponse {
                orchestration_id: batch.orchestration.id,
                requests,
            },
        }),
    ))
}

/// Kick off execution right away instead of waiting for the dispatcher.
/// Harmless for a request someone else is already running: the claim fails.
fn start_if_pending(state: &AppState, request: &CancellationRequest) {
    if request.status == CancellationStatus::Pending {
        state.orchestrator.spawn(request.id);
    }
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

/// GET /api/v1/cancellations/{id}
pub async fn get_cancellation(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let request = state.orchestrator.get(id, auth.user_id).await?;
    Ok(Json(DataResponse { data: request }))
}

/// GET /api/v1/cancellations/{id}/logs
///
/// The audit trail, oldest first.
pub async fn list_logs(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let logs = state.orchestrator.logs(id, auth.user_id).await?;
    Ok(Json(DataResponse { data: logs }))
}

/// GET /api/v1/orchestrations/{id}
pub async fn get_orchestration(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let view = state
        .orchestrator
        .orchestration_status(id, auth.user_id)
        .await?;
    Ok(Json(DataResponse { data: view }))
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

/// POST /api/v1/cancellations/{id}/cancel
///
/// Withdraw a `pending` or `in_progress` request. 409 if it already
/// finished. Work already running at a provider is not interrupted; its
/// result is discarded.
pub async fn cancel_cancellation(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let request = state.orchestrator.cancel(id, auth.user_id).await?;
    Ok(Json(DataResponse { data: request }))
}

#[cfg(test)]
mod tests {
    use unsub_core::cancellation::CancellationMethod;

    use super::*;

    #[test]
    fn method_defaults_to_auto() {
        let input: SubmitCancellation =
            serde_json::from_str(r#"{"subscriptionId":"sub-42"}"#).unwrap();
        assert_eq!(input.method, MethodSelection::Auto);

        let input: SubmitCancellation =
            serde_json::from_str(r#"{"subscriptionId":"sub-42","method":"manual"}"#).unwrap();
        assert_eq!(
            input.method,
            MethodSelection::Pinned(CancellationMethod::Manual)
        );
    }

    #[test]
    fn unknown_method_is_rejected_at_parse() {
        let result =
            serde_json::from_str::<SubmitCancellation>(r#"{"subscriptionId":"s","method":"fax"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn empty_subscription_and_batch_fail_validation() {
        let input = SubmitCancellation {
            subscription_id: String::new(),
            method: MethodSelection::Auto,
        };
        assert!(input.validate().is_err());

        let batch = SubmitBatch { items: vec![] };
        assert!(batch.validate().is_err());

        let batch = SubmitBatch {
            items: vec![SubmitCancellation {
                subscription_id: String::new(),
                method: MethodSelection::Auto,
            }],
        };
        assert!(batch.validate().is_err());
    }
}
