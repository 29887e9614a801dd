//! Background pick-up of `pending` requests.
//!
//! Requests are normally run right after submission by the instance that
//! accepted them. If that instance dies before claiming, the request stays
//! `pending`; this loop finds such requests and runs them. Claims are CAS
//! based, so any number of dispatchers may run against the same store.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use unsub_core::error::CoreError;

use crate::orchestrator::Orchestrator;

/// Requests picked per cycle.
const DEFAULT_BATCH_SIZE: i64 = 20;

pub struct PendingDispatcher {
    orchestrator: Arc<Orchestrator>,
    poll_interval: Duration,
    batch_size: i64,
}

impl PendingDispatcher {
    pub fn new(orchestrator: Arc<Orchestrator>, poll_interval: Duration) -> Self {
        Self {
            orchestrator,
            poll_interval,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Run the dispatcher loop until the cancellation token is triggered.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        tracing::info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Pending dispatcher started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Pending dispatcher shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    match self.dispatch_once().await {
                        Ok(0) => {}
                        Ok(spawned) => tracing::info!(spawned, "Dispatched pending requests"),
                        Err(e) => tracing::error!(error = %e, "Dispatch cycle failed"),
                    }
                }
            }
        }
    }

    /// One cycle: spawn a run for each pending request. Returns how many
    /// were spawned.
    pub async fn dispatch_once(&self) -> Result<usize, CoreError> {
        let pending = self
            .orchestrator
            .store()
            .list_pending(self.batch_size)
            .await?;
        for request in &pending {
            self.orchestrator.spawn(request.id);
        }
        Ok(pending.len())
    }
}
