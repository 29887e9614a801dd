//! Fails `in_progress` requests that stopped making progress.
//!
//! An execution that crashed after claiming leaves its request
//! `in_progress` forever. Every attempt, fallback and retry touches
//! `updated_at`, so a request untouched for longer than the sanity timeout
//! is treated as abandoned.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use unsub_core::error::CoreError;
use unsub_db::models::{CancellationRequest, NewLogEntry};
use unsub_db::CancellationStore;

use crate::notify::CancellationNotifier;

/// How often the reaper scans.
const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(60);

pub struct StaleReaper {
    store: Arc<dyn CancellationStore>,
    notifier: Arc<dyn CancellationNotifier>,
    stale_after: Duration,
    scan_interval: Duration,
}

impl StaleReaper {
    pub fn new(
        store: Arc<dyn CancellationStore>,
        notifier: Arc<dyn CancellationNotifier>,
        stale_after: Duration,
    ) -> Self {
        Self {
            store,
            notifier,
            stale_after,
            scan_interval: DEFAULT_SCAN_INTERVAL
                .min(stale_after)
                .max(Duration::from_secs(1)),
        }
    }

    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.scan_interval);
        tracing::info!(
            stale_after_secs = self.stale_after.as_secs(),
            interval_secs = self.scan_interval.as_secs(),
            "Stale request reaper started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Stale request reaper stopping");
                    break;
                }
                _ = interval.tick() => {
                    match self.reap_once().await {
                        Ok(reaped) if reaped.is_empty() => {
                            tracing::debug!("Stale request reaper: nothing to reap");
                        }
                        Ok(reaped) => {
                            tracing::warn!(count = reaped.len(), "Reaped stale cancellation requests");
                        }
                        Err(e) => tracing::error!(error = %e, "Stale request reaper failed"),
                    }
                }
            }
        }
    }

    /// Fail every stale `in_progress` request and notify its owner.
    pub async fn reap_once(&self) -> Result<Vec<CancellationRequest>, CoreError> {
        let stale_after = chrono::Duration::from_std(self.stale_after)
            .map_err(|e| CoreError::Internal(format!("Invalid stale timeout: {e}")))?;
        let cutoff = Utc::now() - stale_after;
        let entry = NewLogEntry::error(format!(
            "cancellation failed: no progress for {}s, execution presumed lost",
            self.stale_after.as_secs()
        ));

        let reaped = self.store.reap_stale(cutoff, &entry).await?;
        for request in &reaped {
            tracing::warn!(request_id = request.id, "Stale cancellation request failed");
            self.notifier.notify(request);
        }
        Ok(reaped)
    }
}

#[cfg(test)]
mod tests {
    use unsub_core::cancellation::{CancellationStatus, MethodSelection};
    use unsub_db::models::NewCancellationRequest;
    use unsub_db::MemoryCancellationStore;

    use super::*;
    use crate::notify::NoopNotifier;

    #[tokio::test]
    async fn only_stale_in_progress_requests_are_reaped() {
        let store = Arc::new(MemoryCancellationStore::new());
        let mut ids = Vec::new();
        for sub in ["sub-1", "sub-2"] {
            let request = store
                .submit(&NewCancellationRequest {
                    user_id: 1,
                    subscription_id: sub.to_string(),
                    orchestration_id: None,
                    method: MethodSelection::Auto,
                })
                .await
                .unwrap()
                .request;
            ids.push(request.id);
        }
        store.claim(ids[0]).await.unwrap().unwrap();

        // Zero timeout: anything in progress is already stale.
        let reaper = StaleReaper::new(store.clone(), Arc::new(NoopNotifier), Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(5)).await;
        let reaped = reaper.reap_once().await.unwrap();

        assert_eq!(reaped.len(), 1);
        assert_eq!(reaped[0].id, ids[0]);
        assert_eq!(reaped[0].status, CancellationStatus::Failed);
        let pending = store.find_request(ids[1]).await.unwrap().unwrap();
        assert_eq!(pending.status, CancellationStatus::Pending);

        let logs = store.list_logs(ids[0]).await.unwrap();
        assert!(logs[0].message.starts_with("cancellation failed: no progress"));
    }
}
