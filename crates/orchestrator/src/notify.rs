//! Terminal-status notifications.
//!
//! The notification dispatcher is an external collaborator; the
//! orchestrator only hands it a fire-and-forget signal per terminal
//! transition.

use std::sync::Arc;

use unsub_core::cancellation::CancellationStatus;
use unsub_core::stream_events::{
    BUS_CANCELLATION_CANCELLED, BUS_CANCELLATION_COMPLETED, BUS_CANCELLATION_FAILED,
};
use unsub_db::models::CancellationRequest;
use unsub_events::{EventBus, PlatformEvent};

pub trait CancellationNotifier: Send + Sync {
    /// Called once after `request` reached a terminal status. Must not block.
    fn notify(&self, request: &CancellationRequest);
}

/// Publishes a [`PlatformEvent`] per terminal request onto the [`EventBus`].
pub struct EventBusNotifier {
    bus: Arc<EventBus>,
}

impl EventBusNotifier {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }
}

fn event_type(status: CancellationStatus) -> Option<&'static str> {
    match status {
        CancellationStatus::Completed => Some(BUS_CANCELLATION_COMPLETED),
        CancellationStatus::Failed => Some(BUS_CANCELLATION_FAILED),
        CancellationStatus::Cancelled => Some(BUS_CANCELLATION_CANCELLED),
        CancellationStatus::Pending | CancellationStatus::InProgress => None,
    }
}

impl CancellationNotifier for EventBusNotifier {
    fn notify(&self, request: &CancellationRequest) {
        let Some(event_type) = event_type(request.status) else {
            tracing::warn!(
                request_id = request.id,
                status = %request.status,
                "Refusing to notify for non-terminal request",
            );
            return;
        };

        let event = PlatformEvent::new(event_type)
            .with_source("cancellation_request", request.id)
            .with_recipient(request.user_id)
            .with_payload(serde_json::json!({
                "subscription_id": request.subscription_id,
                "orchestration_id": request.orchestration_id,
                "method": request.active_method,
                "attempts": request.attempts,
            }));
        let receivers = self.bus.publish(event);
        tracing::debug!(request_id = request.id, event_type, receivers, "Notification published");
    }
}

/// Discards every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl CancellationNotifier for NoopNotifier {
    fn notify(&self, _request: &CancellationRequest) {}
}
