//! Seam where terminal-status events leave for the notification dispatcher.
//!
//! Delivery (email, push) belongs to an external collaborator that is not
//! part of this workspace. [`NotificationRelay`] only drains the
//! [`EventBus`](crate::bus::EventBus) and logs each event at the point where
//! that collaborator would be called; it sends nothing anywhere. It runs as
//! a long-lived background task and exits when the bus sender is dropped.

use tokio::sync::broadcast;

use crate::bus::PlatformEvent;

/// Background service draining the bus at the notification-dispatcher seam.
///
/// Logs and counts events only. Wire the external dispatcher in here.
pub struct NotificationRelay;

impl NotificationRelay {
    /// Run the relay loop until the bus closes. Returns how many events
    /// were observed.
    pub async fn run(mut receiver: broadcast::Receiver<PlatformEvent>) -> u64 {
        let mut observed = 0;
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    observed += 1;
                    tracing::info!(
                        event_type = %event.event_type,
                        entity_id = ?event.source_entity_id,
                        user_id = ?event.recipient_user_id,
                        "Notification event reached dispatcher seam",
                    );
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Notification relay lagged, events were dropped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("Event bus closed, notification relay shutting down");
                    break;
                }
            }
        }
        observed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;

    #[tokio::test]
    async fn relay_drains_until_bus_is_dropped() {
        let bus = EventBus::default();
        let handle = tokio::spawn(NotificationRelay::run(bus.subscribe()));

        bus.publish(PlatformEvent::new("cancellation.completed").with_recipient(1));
        bus.publish(PlatformEvent::new("cancellation.failed").with_recipient(1));
        drop(bus);

        assert_eq!(handle.await.unwrap(), 2);
    }
}
