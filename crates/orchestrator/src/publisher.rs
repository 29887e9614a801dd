//! Live status streams.
//!
//! A stream is a snapshot followed by updates produced by re-reading the
//! store on a fixed interval. It holds no state beyond the last view it
//! emitted, so any instance can serve any client and a reconnecting client
//! just opens a new stream. The polling task is owned by the stream and
//! aborted when the stream is dropped; dropping it never touches the
//! request itself.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::task::AbortOnDropHandle;
use unsub_core::cancellation::{CancellationMethod, CancellationStatus, LogLevel, MethodSelection};
use unsub_core::error::CoreError;
use unsub_core::stream_events::{EVENT_STATUS, EVENT_UPDATE};
use unsub_core::types::{DbId, Timestamp};
use unsub_db::models::{CancellationLog, CancellationRequest};
use unsub_db::CancellationStore;

/// Buffered events per stream before the poller waits on the client.
const STREAM_BUFFER: usize = 8;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastLog {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: Timestamp,
}

impl From<CancellationLog> for LastLog {
    fn from(log: CancellationLog) -> Self {
        Self {
            level: log.level,
            message: log.message,
            timestamp: log.created_at,
        }
    }
}

/// An event on a status stream. Serializes to the wire payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum StatusEvent {
    #[serde(rename = "cancellation.status", rename_all = "camelCase")]
    Snapshot {
        request_id: DbId,
        orchestration_id: Option<DbId>,
        status: CancellationStatus,
        method: MethodSelection,
        active_method: Option<CancellationMethod>,
        created_at: Timestamp,
        updated_at: Timestamp,
    },
    #[serde(rename = "cancellation.update", rename_all = "camelCase")]
    Update {
        request_id: DbId,
        orchestration_id: Option<DbId>,
        status: CancellationStatus,
        last_log: Option<LastLog>,
        updated_at: Timestamp,
    },
}

impl StatusEvent {
    fn snapshot(request: &CancellationRequest, orchestration_id: Option<DbId>) -> Self {
        Self::Snapshot {
            request_id: request.id,
            orchestration_id,
            status: request.status,
            method: request.method,
            active_method: request.active_method,
            created_at: request.created_at,
            updated_at: request.updated_at,
        }
    }

    fn update(
        request: &CancellationRequest,
        orchestration_id: Option<DbId>,
        last_log: Option<CancellationLog>,
    ) -> Self {
        Self::Update {
            request_id: request.id,
            orchestration_id,
            status: request.status,
            last_log: last_log.map(LastLog::from),
            updated_at: request.updated_at,
        }
    }

    /// The SSE `event:` name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Snapshot { .. } => EVENT_STATUS,
            Self::Update { .. } => EVENT_UPDATE,
        }
    }

    pub fn status(&self) -> CancellationStatus {
        match self {
            Self::Snapshot { status, .. } | Self::Update { status, .. } => *status,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }
}

/// What the poller compares between ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct View {
    status: CancellationStatus,
    last_log_id: Option<DbId>,
}

pub struct StatusPublisher {
    store: Arc<dyn CancellationStore>,
    poll_interval: Duration,
}

impl StatusPublisher {
    pub fn new(store: Arc<dyn CancellationStore>, poll_interval: Duration) -> Self {
        Self {
            store,
            poll_interval,
        }
    }

    /// Open a stream for a request owned by `user_id`.
    ///
    /// `orchestration_id` overrides the request's own grouping for display;
    /// when `None` the stored value is used.
    pub async fn open_stream(
        &self,
        request_id: DbId,
        user_id: DbId,
        orchestration_id: Option<DbId>,
    ) -> Result<StatusStream, CoreError> {
        let request = self
            .store
            .find_request(request_id)
            .await?
            .filter(|r| r.is_owned_by(user_id))
            .ok_or(CoreError::request_not_found(request_id))?;
        let orchestration_id = orchestration_id.or(request.orchestration_id);
        let snapshot = StatusEvent::snapshot(&request, orchestration_id);

        if request.status.is_terminal() {
            tracing::debug!(request_id, status = %request.status, "Stream opened on terminal request");
            return Ok(StatusStream::finished(snapshot));
        }

        let last_log = self.store.latest_log(request_id).await?;
        let view = View {
            status: request.status,
            last_log_id: last_log.map(|l| l.id),
        };

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let task = tokio::spawn(poll_updates(
            Arc::clone(&self.store),
            request_id,
            orchestration_id,
            self.poll_interval,
            view,
            tx,
        ));
        tracing::debug!(request_id, user_id, "Status stream opened");

        Ok(StatusStream {
            snapshot: Some(snapshot),
            updates: Some(rx),
            _poller: Some(AbortOnDropHandle::new(task)),
        })
    }
}

async fn poll_updates(
    store: Arc<dyn CancellationStore>,
    request_id: DbId,
    orchestration_id: Option<DbId>,
    interval: Duration,
    mut last: View,
    tx: mpsc::Sender<StatusEvent>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = tx.closed() => {
                tracing::debug!(request_id, "Status stream client went away");
                break;
            }
            _ = ticker.tick() => {
                let request = match store.find_request(request_id).await {
                    Ok(Some(request)) => request,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(request_id, error = %e, "Status poll failed");
                        continue;
                    }
                };
                let last_log = match store.latest_log(request_id).await {
                    Ok(log) => log,
                    Err(e) => {
                        tracing::warn!(request_id, error = %e, "Status poll failed");
                        continue;
                    }
                };

                let view = View {
                    status: request.status,
                    last_log_id: last_log.as_ref().map(|l| l.id),
                };
                if view != last {
                    last = view;
                    let event = StatusEvent::update(&request, orchestration_id, last_log);
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
                if request.status.is_terminal() {
                    break;
                }
            }
        }
    }
}

/// Events for one client connection. Ends after the terminal event.
pub struct StatusStream {
    snapshot: Option<StatusEvent>,
    updates: Option<mpsc::Receiver<StatusEvent>>,
    _poller: Option<AbortOnDropHandle<()>>,
}

impl StatusStream {
    fn finished(snapshot: StatusEvent) -> Self {
        Self {
            snapshot: Some(snapshot),
            updates: None,
            _poller: None,
        }
    }
}

impl Stream for StatusStream {
    type Item = StatusEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if let Some(snapshot) = this.snapshot.take() {
            return Poll::Ready(Some(snapshot));
        }
        match this.updates.as_mut() {
            Some(rx) => rx.poll_recv(cx),
            None => Poll::Ready(None),
        }
    }
}
