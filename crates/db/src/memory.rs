//! In-process [`CancellationStore`] for tests and single-node development.
//!
//! Mirrors the PostgreSQL semantics: one mutex-guarded critical section per
//! operation stands in for the row-level conditional `UPDATE`, so the
//! claim is still a compare-and-swap and terminal rows are still frozen.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use unsub_core::cancellation::{can_transition, CancellationMethod, CancellationStatus};
use unsub_core::types::{DbId, Timestamp};

use crate::models::{
    CancellationLog, CancellationRequest, NewCancellationRequest, NewLogEntry, Orchestration,
    Submission,
};
use crate::store::{ensure_finish_target, CancellationStore, StoreError};

#[derive(Default)]
struct Inner {
    next_request_id: DbId,
    next_log_id: DbId,
    next_orchestration_id: DbId,
    requests: BTreeMap<DbId, CancellationRequest>,
    logs: Vec<CancellationLog>,
    orchestrations: BTreeMap<DbId, Orchestration>,
}

impl Inner {
    fn push_log(&mut self, request_id: DbId, entry: &NewLogEntry) {
        self.next_log_id += 1;
        self.logs.push(CancellationLog {
            id: self.next_log_id,
            request_id,
            level: entry.level,
            message: entry.message.clone(),
            created_at: Utc::now(),
        });
    }

    /// Apply `to` if the row exists, is in `from` and the edge is legal.
    fn transition(
        &mut self,
        id: DbId,
        from: &[CancellationStatus],
        to: CancellationStatus,
    ) -> Option<&mut CancellationRequest> {
        let request = self.requests.get_mut(&id)?;
        if !from.contains(&request.status) || !can_transition(request.status, to) {
            return None;
        }
        let now = Utc::now();
        request.status = to;
        request.updated_at = now;
        if to.is_terminal() {
            request.completed_at = Some(now);
        }
        Some(request)
    }

    fn in_progress_mut(&mut self, id: DbId) -> Option<&mut CancellationRequest> {
        self.requests
            .get_mut(&id)
            .filter(|r| r.status == CancellationStatus::InProgress)
    }
}

/// Mutex-guarded in-memory store.
#[derive(Default)]
pub struct MemoryCancellationStore {
    inner: Mutex<Inner>,
}

impl MemoryCancellationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CancellationStore for MemoryCancellationStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn create_orchestration(&self, user_id: DbId) -> Result<Orchestration, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.next_orchestration_id += 1;
        let orchestration = Orchestration {
            id: inner.next_orchestration_id,
            user_id,
            created_at: Utc::now(),
        };
        inner
            .orchestrations
            .insert(orchestration.id, orchestration.clone());
        Ok(orchestration)
    }

    async fn find_orchestration(&self, id: DbId) -> Result<Option<Orchestration>, StoreError> {
        Ok(self.inner.lock().await.orchestrations.get(&id).cloned())
    }

    async fn submit(&self, input: &NewCancellationRequest) -> Result<Submission, StoreError> {
        let mut inner = self.inner.lock().await;

        let existing = inner.requests.values().find(|r| {
            r.user_id == input.user_id
                && r.subscription_id == input.subscription_id
                && r.status.is_active()
        });
        if let Some(request) = existing {
            return Ok(Submission {
                request: request.clone(),
                created: false,
            });
        }

        inner.next_request_id += 1;
        let now = Utc::now();
        let request = CancellationRequest {
            id: inner.next_request_id,
            user_id: input.user_id,
            subscription_id: input.subscription_id.clone(),
            orchestration_id: input.orchestration_id,
            method: input.method,
            status: CancellationStatus::Pending,
            active_method: None,
            attempts: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        inner.requests.insert(request.id, request.clone());
        Ok(Submission {
            request,
            created: true,
        })
    }

    async fn find_request(&self, id: DbId) -> Result<Option<CancellationRequest>, StoreError> {
        Ok(self.inner.lock().await.requests.get(&id).cloned())
    }

    async fn list_by_orchestration(
        &self,
        orchestration_id: DbId,
    ) -> Result<Vec<CancellationRequest>, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .requests
            .values()
            .filter(|r| r.orchestration_id == Some(orchestration_id))
            .cloned()
            .collect())
    }

    async fn list_pending(&self, limit: i64) -> Result<Vec<CancellationRequest>, StoreError> {
        let limit = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
        Ok(self
            .inner
            .lock()
            .await
            .requests
            .values()
            .filter(|r| r.status == CancellationStatus::Pending)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn claim(&self, id: DbId) -> Result<Option<CancellationRequest>, StoreError> {
        let mut inner = self.inner.lock().await;
        Ok(inner
            .transition(
                id,
                &[CancellationStatus::Pending],
                CancellationStatus::InProgress,
            )
            .map(|r| r.clone()))
    }

    async fn switch_method(
        &self,
        id: DbId,
        method: CancellationMethod,
        entry: Option<&NewLogEntry>,
    ) -> Result<Option<CancellationRequest>, StoreError> {
        let mut inner = self.inner.lock().await;
        let Some(request) = inner.in_progress_mut(id) else {
            return Ok(None);
        };
        request.active_method = Some(method);
        request.updated_at = Utc::now();
        let updated = request.clone();
        if let Some(entry) = entry {
            inner.push_log(id, entry);
        }
        Ok(Some(updated))
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

        let mut inner = self.inner.lock().await;
        let Some(request) = inner.in_progress_mut(id) else {
            return Ok(None);
        };
        request.attempts += 1;
        request.updated_at = Utc::now();

        let updated = match finish {
            Some(status) => inner
                .transition(id, &[CancellationStatus::InProgress], status)
                .map(|r| r.clone()),
            None => inner.requests.get(&id).cloned(),
        };
        inner.push_log(id, entry);
        Ok(updated)
    }

    async fn append_log(&self, id: DbId, entry: &NewLogEntry) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.in_progress_mut(id).is_none() {
            return Ok(false);
        }
        inner.push_log(id, entry);
        Ok(true)
    }

    async fn finish(
        &self,
        id: DbId,
        status: CancellationStatus,
        entry: &NewLogEntry,
    ) -> Result<Option<CancellationRequest>, StoreError> {
        ensure_finish_target(status)?;

        let mut inner = self.inner.lock().await;
        let updated = inner
            .transition(id, &[CancellationStatus::InProgress], status)
            .map(|r| r.clone());
        if updated.is_some() {
            inner.push_log(id, entry);
        }
        Ok(updated)
    }

    async fn cancel(
        &self,
        id: DbId,
        user_id: DbId,
        entry: &NewLogEntry,
    ) -> Result<Option<CancellationRequest>, StoreError> {
        let mut inner = self.inner.lock().await;
        if !inner.requests.get(&id).is_some_and(|r| r.is_owned_by(user_id)) {
            return Ok(None);
        }
        let updated = inner
            .transition(
                id,
                &CancellationStatus::ACTIVE,
                CancellationStatus::Cancelled,
            )
            .map(|r| r.clone());
        if updated.is_some() {
            inner.push_log(id, entry);
        }
        Ok(updated)
    }

    async fn latest_log(&self, request_id: DbId) -> Result<Option<CancellationLog>, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .logs
            .iter()
            .rev()
            .find(|l| l.request_id == request_id)
            .cloned())
    }

    async fn list_logs(&self, request_id: DbId) -> Result<Vec<CancellationLog>, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .logs
            .iter()
            .filter(|l| l.request_id == request_id)
            .cloned()
            .collect())
    }

    async fn reap_stale(
        &self,
        cutoff: Timestamp,
        entry: &NewLogEntry,
    ) -> Result<Vec<CancellationRequest>, StoreError> {
        let mut inner = self.inner.lock().await;
        let stale: Vec<DbId> = inner
            .requests
            .values()
            .filter(|r| r.status == CancellationStatus::InProgress && r.updated_at < cutoff)
            .map(|r| r.id)
            .collect();

        let mut reaped = Vec::with_capacity(stale.len());
        for id in stale {
            if let Some(request) = inner
                .transition(id, &[CancellationStatus::InProgress], CancellationStatus::Failed)
                .map(|r| r.clone())
            {
                inner.push_log(id, entry);
                reaped.push(request);
            }
        }
        Ok(reaped)
    }
}
