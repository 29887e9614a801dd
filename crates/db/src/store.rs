//! The store seam shared by the orchestrator and the status publisher.
//!
//! The store is the single source of truth and the only coordination point
//! between orchestrator instances: single-flight execution rests on
//! [`CancellationStore::claim`] being an atomic compare-and-swap, and on
//! every later write being conditional on the stored status.

use async_trait::async_trait;
use unsub_core::cancellation::{CancellationMethod, CancellationStatus};
use unsub_core::types::{DbId, Timestamp};

use crate::models::{
    CancellationLog, CancellationRequest, NewCancellationRequest, NewLogEntry, Orchestration,
    Submission,
};
use crate::repositories::{CancellationLogRepo, CancellationRequestRepo, OrchestrationRepo};
use crate::DbPool;

/// Failure talking to the backing store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// An invariant the backend enforces was violated (e.g. an illegal transition).
    #[error("Store invariant violated: {0}")]
    Invariant(String),
}

/// Durable record of cancellation requests and their logs.
///
/// Methods that mutate a request return `None` / `false` when the guard
/// condition (the expected current status) no longer holds; they never
/// write to a terminal row.
#[async_trait]
pub trait CancellationStore: Send + Sync {
    /// Cheap reachability check for health endpoints.
    async fn ping(&self) -> Result<(), StoreError>;

    async fn create_orchestration(&self, user_id: DbId) -> Result<Orchestration, StoreError>;

    async fn find_orchestration(&self, id: DbId) -> Result<Option<Orchestration>, StoreError>;

    /// Idempotent submit: creates a `pending` row unless one is already active
    /// for `(user_id, subscription_id)`.
    async fn submit(&self, input: &NewCancellationRequest) -> Result<Submission, StoreError>;

    async fn find_request(&self, id: DbId) -> Result<Option<CancellationRequest>, StoreError>;

    async fn list_by_orchestration(
        &self,
        orchestration_id: DbId,
    ) -> Result<Vec<CancellationRequest>, StoreError>;

    async fn list_pending(&self, limit: i64) -> Result<Vec<CancellationRequest>, StoreError>;

    /// CAS `pending -> in_progress`.
    async fn claim(&self, id: DbId) -> Result<Option<CancellationRequest>, StoreError>;

    /// Set `active_method`, logging the switch when `entry` is given, while `in_progress`.
    async fn switch_method(
        &self,
        id: DbId,
        method: CancellationMethod,
        entry: Option<&NewLogEntry>,
    ) -> Result<Option<CancellationRequest>, StoreError>;

    /// Increment `attempts` + log, optionally finishing, while `in_progress`.
    async fn record_attempt(
        &self,
        id: DbId,
        entry: &NewLogEntry,
        finish: Option<CancellationStatus>,
    ) -> Result<Option<CancellationRequest>, StoreError>;

    /// Append a log line while `in_progress`.
    async fn append_log(&self, id: DbId, entry: &NewLogEntry) -> Result<bool, StoreError>;

    /// `in_progress -> completed|failed` with a final log line.
    async fn finish(
        &self,
        id: DbId,
        status: CancellationStatus,
        entry: &NewLogEntry,
    ) -> Result<Option<CancellationRequest>, StoreError>;

    /// Owner-scoped `pending|in_progress -> cancelled` with a final log line.
    async fn cancel(
        &self,
        id: DbId,
        user_id: DbId,
        entry: &NewLogEntry,
    ) -> Result<Option<CancellationRequest>, StoreError>;

    async fn latest_log(&self, request_id: DbId) -> Result<Option<CancellationLog>, StoreError>;

    async fn list_logs(&self, request_id: DbId) -> Result<Vec<CancellationLog>, StoreError>;

    /// Fail `in_progress` requests whose last write is older than `cutoff`.
    async fn reap_stale(
        &self,
        cutoff: Timestamp,
        entry: &NewLogEntry,
    ) -> Result<Vec<CancellationRequest>, StoreError>;
}

/// Reject terminal targets other than those reachable from `in_progress`.
pub(crate) fn ensure_finish_target(status: CancellationStatus) -> Result<(), StoreError> {
    match status {
        CancellationStatus::Completed | CancellationStatus::Failed => Ok(()),
        other => Err(StoreError::Invariant(format!(
            "{other} is not a finishing status"
        ))),
    }
}

// ---------------------------------------------------------------------------
// PostgreSQL
// ---------------------------------------------------------------------------

/// [`CancellationStore`] over the PostgreSQL repositories.
#[derive(Clone)]
pub struct PgCancellationStore {
    pool: DbPool,
}

impl PgCancellationStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl CancellationStore for PgCancellationStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(crate::health_check(&self.pool).await?)
    }

    async fn create_orchestration(&self, user_id: DbId) -> Result<Orchestration, StoreError> {
        Ok(OrchestrationRepo::create(&self.pool, user_id).await?)
    }

    async fn find_orchestration(&self, id: DbId) -> Result<Option<Orchestration>, StoreError> {
        Ok(OrchestrationRepo::find_by_id(&self.pool, id).await?)
    }

    async fn submit(&self, input: &NewCancellationRequest) -> Result<Submission, StoreError> {
        Ok(CancellationRequestRepo::submit(&self.pool, input).await?)
    }

    async fn find_request(&self, id: DbId) -> Result<Option<CancellationRequest>, StoreError> {
        Ok(CancellationRequestRepo::find_by_id(&self.pool, id).await?)
    }

    async fn list_by_orchestration(
        &self,
        orchestration_id: DbId,
    ) -> Result<Vec<CancellationRequest>, StoreError> {
        Ok(CancellationRequestRepo::list_by_orchestration(&self.pool, orchestration_id).await?)
    }

    async fn list_pending(&self, limit: i64) -> Result<Vec<CancellationRequest>, StoreError> {
        Ok(CancellationRequestRepo::list_pending(&self.pool, limit).await?)
    }

    async fn claim(&self, id: DbId) -> Result<Option<CancellationRequest>, StoreError> {
        Ok(CancellationRequestRepo::claim(&self.pool, id).await?)
    }

    async fn switch_method(
        &self,
        id: DbId,
        method: CancellationMethod,
        entry: Option<&NewLogEntry>,
    ) -> Result<Option<CancellationRequest>, StoreError> {
        Ok(CancellationRequestRepo::switch_method(&self.pool, id, method, entry).await?)
    }

    async fn record_attempt(
        &self,
        id: DbId,
        entry: &NewLogEntry,
        finish: Option<CancellationStatus>,
    ) -> Result<Option<CancellationRequest>, StoreError> {
        if let Some(status) = finish {
            ensure_finish_target(status)?;
        }
        Ok(CancellationRequestRepo::record_attempt(&self.pool, id, entry, finish).await?)
    }

    async fn append_log(&self, id: DbId, entry: &NewLogEntry) -> Result<bool, StoreError> {
        Ok(CancellationLogRepo::append_if_in_progress(&self.pool, id, entry).await?)
    }

    async fn finish(
        &self,
        id: DbId,
        status: CancellationStatus,
        entry: &NewLogEntry,
    ) -> Result<Option<CancellationRequest>, StoreError> {
        ensure_finish_target(status)?;
        Ok(CancellationRequestRepo::finish(&self.pool, id, status, entry).await?)
    }

    async fn cancel(
        &self,
        id: DbId,
        user_id: DbId,
        entry: &NewLogEntry,
    ) -> Result<Option<CancellationRequest>, StoreError> {
        Ok(CancellationRequestRepo::cancel(&self.pool, id, user_id, entry).await?)
    }

    async fn latest_log(&self, request_id: DbId) -> Result<Option<CancellationLog>, StoreError> {
        Ok(CancellationLogRepo::latest_for_request(&self.pool, request_id).await?)
    }

    async fn list_logs(&self, request_id: DbId) -> Result<Vec<CancellationLog>, StoreError> {
        Ok(CancellationLogRepo::list_for_request(&self.pool, request_id).await?)
    }

    async fn reap_stale(
        &self,
        cutoff: Timestamp,
        entry: &NewLogEntry,
    ) -> Result<Vec<CancellationRequest>, StoreError> {
        Ok(CancellationRequestRepo::reap_stale(&self.pool, cutoff, entry).await?)
    }
}

impl From<StoreError> for unsub_core::error::CoreError {
    fn from(err: StoreError) -> Self {
        tracing::error!(error = %err, "Cancellation store failure");
        unsub_core::error::CoreError::Internal(err.to_string())
    }
}
