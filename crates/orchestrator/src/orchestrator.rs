//! The cancellation request state machine.
//!
//! `run` claims a request with a compare-and-swap on its status, then walks
//! the strategy plan: each strategy is retried with exponential backoff on
//! transient failures and abandoned on permanent ones or once its attempts
//! are spent. In `auto` mode the next strategy takes over; a pinned request
//! fails. Every write after the claim is conditional on the request still
//! being `in_progress`, so a concurrent `cancel` simply makes the running
//! execution's later writes no-ops and its result is discarded.

use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;
use unsub_core::cancellation::{
    aggregate_status, validate_transition, CancellationMethod, CancellationStatus, MethodSelection,
    OrchestrationStatus,
};
use unsub_core::error::CoreError;
use unsub_core::retry::RetryPolicy;
use unsub_core::types::DbId;
use unsub_db::models::{
    CancellationLog, CancellationRequest, NewCancellationRequest, NewLogEntry, Orchestration,
    Submission,
};
use unsub_db::CancellationStore;

use crate::catalog::{Subscription, SubscriptionCatalog};
use crate::executor::{
    execute_guarded, AttemptContext, CancellationExecutor, ExecutorSuccess, FailureClass,
};
use crate::notify::CancellationNotifier;

/// One executor per strategy.
pub struct Executors {
    pub api: Arc<dyn CancellationExecutor>,
    pub automation: Arc<dyn CancellationExecutor>,
    pub manual: Arc<dyn CancellationExecutor>,
}

impl Executors {
    pub fn get(&self, method: CancellationMethod) -> &dyn CancellationExecutor {
        match method {
            CancellationMethod::Api => self.api.as_ref(),
            CancellationMethod::Automation => self.automation.as_ref(),
            CancellationMethod::Manual => self.manual.as_ref(),
        }
    }
}

/// What a call to [`Orchestrator::run`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Another execution owns the request, or it is not `pending`.
    NotClaimed,
    /// This execution moved the request to a terminal status.
    Finished(CancellationRequest),
    /// The request left `in_progress` underneath this execution (e.g. the
    /// owner cancelled it); remaining work was dropped.
    Interrupted,
}

/// One member of a batch submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItem {
    pub subscription_id: String,
    pub method: MethodSelection,
}

#[derive(Debug, Clone)]
pub struct BatchSubmission {
    pub orchestration: Orchestration,
    pub submissions: Vec<Submission>,
}

/// Derived view of an orchestration.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestrationView {
    pub orchestration: Orchestration,
    pub status: OrchestrationStatus,
    pub members: Vec<CancellationRequest>,
}

enum StrategyResult {
    Succeeded(CancellationRequest),
    /// Strategy gave up; the message is the reason.
    Abandoned(String),
    Interrupted,
}

pub struct Orchestrator {
    store: Arc<dyn CancellationStore>,
    catalog: Arc<dyn SubscriptionCatalog>,
    executors: Executors,
    notifier: Arc<dyn CancellationNotifier>,
    retry: RetryPolicy,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn CancellationStore>,
        catalog: Arc<dyn SubscriptionCatalog>,
        executors: Executors,
        notifier: Arc<dyn CancellationNotifier>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            catalog,
            executors,
            notifier,
            retry,
        }
    }

    pub fn store(&self) -> &Arc<dyn CancellationStore> {
        &self.store
    }

    // -----------------------------------------------------------------------
    // Submission
    // -----------------------------------------------------------------------

    /// Create a `pending` request, or return the active one for the same
    /// subscription.
    pub async fn submit(
        &self,
        user_id: DbId,
        subscription_id: &str,
        method: MethodSelection,
    ) -> Result<Submission, CoreError> {
        self.ensure_known(subscription_id).await?;
        self.submit_member(user_id, subscription_id, method, None)
            .await
    }

    /// Submit several subscriptions under one new orchestration.
    ///
    /// Every subscription is validated before anything is written. A member
    /// that matches an already-active request keeps that request's original
    /// orchestration.
    pub async fn submit_batch(
        &self,
        user_id: DbId,
        items: &[BatchItem],
    ) -> Result<BatchSubmission, CoreError> {
        if items.is_empty() {
            return Err(CoreError::Validation(
                "A batch needs at least one subscription".to_string(),
            ));
        }
        for item in items {
            self.ensure_known(&item.subscription_id).await?;
        }

        let orchestration = self.store.create_orchestration(user_id).await?;
        let mut submissions = Vec::with_capacity(items.len());
        for item in items {
            submissions.push(
                self.submit_member(
                    user_id,
                    &item.subscription_id,
                    item.method,
                    Some(orchestration.id),
                )
                .await?,
            );
        }

        tracing::info!(
            orchestration_id = orchestration.id,
            user_id,
            members = submissions.len(),
            "Cancellation batch submitted",
        );
        Ok(BatchSubmission {
            orchestration,
            submissions,
        })
    }

    async fn submit_member(
        &self,
        user_id: DbId,
        subscription_id: &str,
        method: MethodSelection,
        orchestration_id: Option<DbId>,
    ) -> Result<Submission, CoreError> {
        let submission = self
            .store
            .submit(&NewCancellationRequest {
                user_id,
                subscription_id: subscription_id.to_string(),
                orchestration_id,
                method,
            })
            .await?;

        if submission.created {
            tracing::info!(
                request_id = submission.request.id,
                user_id,
                subscription_id,
                method = %method,
                "Cancellation request submitted",
            );
        } else {
            tracing::debug!(
                request_id = submission.request.id,
                subscription_id,
                "Reusing active cancellation request",
            );
        }
        Ok(submission)
    }

    async fn ensure_known(&self, subscription_id: &str) -> Result<Subscription, CoreError> {
        if subscription_id.trim().is_empty() {
            return Err(CoreError::Validation(
                "subscription_id must not be empty".to_string(),
            ));
        }
        self.catalog
            .lookup(subscription_id)
            .await
            .map_err(|e| CoreError::Internal(e.to_string()))?
            .ok_or_else(|| CoreError::Validation(format!("Unknown subscription '{subscription_id}'")))
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    /// Run `run` on a detached task.
    pub fn spawn(self: &Arc<Self>, request_id: DbId) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            match this.run(request_id).await {
                Ok(outcome) => {
                    tracing::debug!(request_id, outcome = outcome_label(&outcome), "Run finished")
                }
                Err(e) => tracing::error!(request_id, error = %e, "Cancellation run failed"),
            }
        })
    }

    /// Claim and execute a request.
    pub async fn run(&self, request_id: DbId) -> Result<RunOutcome, CoreError> {
        let Some(request) = self.store.claim(request_id).await? else {
            tracing::debug!(request_id, "Request not claimable, skipping");
            return Ok(RunOutcome::NotClaimed);
        };
        tracing::info!(request_id, method = %request.method, "Cancellation request claimed");

        let subscription = match self.catalog.lookup(&request.subscription_id).await {
            Ok(Some(subscription)) => subscription,
            Ok(None) => {
                let reason = format!(
                    "subscription {} is no longer in the catalog",
                    request.subscription_id
                );
                return self.fail(request_id, &reason).await;
            }
            Err(e) => return self.fail(request_id, &e.to_string()).await,
        };

        if let MethodSelection::Pinned(method) = request.method {
            if !subscription.supports(method) {
                let reason = format!(
                    "{method} cancellation is not supported for {}",
                    subscription.display_name
                );
                return self.fail(request_id, &reason).await;
            }
        } else {
            for method in CancellationMethod::PRIORITY {
                if subscription.supports(method) {
                    continue;
                }
                let entry = NewLogEntry::info(format!(
                    "skipping {method}: not supported for {}",
                    subscription.display_name
                ));
                if !self.store.append_log(request_id, &entry).await? {
                    return Ok(self.interrupted(request_id, None));
                }
            }
        }

        let plan = request.method.plan(&subscription.methods);
        let mut last_reason = format!(
            "no cancellation method available for {}",
            subscription.display_name
        );

        for (index, &method) in plan.iter().enumerate() {
            let switch_entry = (index > 0).then(|| NewLogEntry::info(format!("switching to {method}")));
            if self
                .store
                .switch_method(request_id, method, switch_entry.as_ref())
                .await?
                .is_none()
            {
                return Ok(self.interrupted(request_id, Some(method)));
            }
            if index > 0 {
                tracing::info!(request_id, method = %method, "Falling back to next strategy");
            }

            match self.run_strategy(&request, &subscription, method).await? {
                StrategyResult::Succeeded(done) => return Ok(RunOutcome::Finished(done)),
                StrategyResult::Abandoned(reason) => last_reason = reason,
                StrategyResult::Interrupted => return Ok(self.interrupted(request_id, Some(method))),
            }
        }

        self.fail(request_id, &last_reason).await
    }

    /// Attempt one strategy until it succeeds or is abandoned.
    async fn run_strategy(
        &self,
        request: &CancellationRequest,
        subscription: &Subscription,
        method: CancellationMethod,
    ) -> Result<StrategyResult, CoreError> {
        let executor = self.executors.get(method);
        let mut attempt: u32 = 0;

        loop {
            if attempt > 0 && !self.still_in_progress(request.id).await? {
                return Ok(StrategyResult::Interrupted);
            }
            attempt += 1;

            let ctx = AttemptContext {
                request_id: request.id,
                user_id: request.user_id,
                attempt,
            };
            let err = match execute_guarded(executor, subscription, &ctx).await {
                Ok(success) => {
                    let entry = success_entry(attempt, success);
                    return match self
                        .store
                        .record_attempt(request.id, &entry, Some(CancellationStatus::Completed))
                        .await?
                    {
                        Some(done) => {
                            tracing::info!(
                                request_id = request.id,
                                method = %method,
                                attempt,
                                "Cancellation completed",
                            );
                            self.notifier.notify(&done);
                            Ok(StrategyResult::Succeeded(done))
                        }
                        None => Ok(StrategyResult::Interrupted),
                    };
                }
                Err(err) => err,
            };

            let entry = NewLogEntry::warn(format!("attempt {attempt} failed: {err}"));
            if self
                .store
                .record_attempt(request.id, &entry, None)
                .await?
                .is_none()
            {
                return Ok(StrategyResult::Interrupted);
            }

            let class = err.classification();
            tracing::warn!(
                request_id = request.id,
                method = %method,
                attempt,
                class = ?class,
                error = %err,
                "Cancellation attempt failed",
            );

            if class == FailureClass::Permanent {
                return Ok(StrategyResult::Abandoned(err.to_string()));
            }
            if !self.retry.has_attempts_left(attempt) {
                return Ok(StrategyResult::Abandoned(format!(
                    "{method} gave up after {attempt} attempts: {err}"
                )));
            }

            let delay = match class {
                FailureClass::SessionUnavailable => self.retry.session_retry_delay,
                _ => self.retry.delay_for(attempt),
            };
            tracing::debug!(
                request_id = request.id,
                delay_ms = delay.as_millis() as u64,
                "Backing off before retry",
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn still_in_progress(&self, request_id: DbId) -> Result<bool, CoreError> {
        Ok(self
            .store
            .find_request(request_id)
            .await?
            .is_some_and(|r| r.status == CancellationStatus::InProgress))
    }

    async fn fail(&self, request_id: DbId, reason: &str) -> Result<RunOutcome, CoreError> {
        let entry = NewLogEntry::error(format!("cancellation failed: {reason}"));
        match self
            .store
            .finish(request_id, CancellationStatus::Failed, &entry)
            .await?
        {
            Some(failed) => {
                tracing::warn!(request_id, reason, "Cancellation failed");
                self.notifier.notify(&failed);
                Ok(RunOutcome::Finished(failed))
            }
            None => Ok(self.interrupted(request_id, None)),
        }
    }

    fn interrupted(&self, request_id: DbId, method: Option<CancellationMethod>) -> RunOutcome {
        tracing::info!(
            request_id,
            method = ?method,
            "Request left in_progress during execution, discarding result",
        );
        RunOutcome::Interrupted
    }

    // -----------------------------------------------------------------------
    // Owner operations
    // -----------------------------------------------------------------------

    /// Withdraw a request. `InvalidTransition` if it is already terminal.
    pub async fn cancel(
        &self,
        request_id: DbId,
        user_id: DbId,
    ) -> Result<CancellationRequest, CoreError> {
        let entry = NewLogEntry::info("cancellation withdrawn by user");
        if let Some(cancelled) = self.store.cancel(request_id, user_id, &entry).await? {
            tracing::info!(request_id, user_id, "Cancellation request withdrawn");
            self.notifier.notify(&cancelled);
            return Ok(cancelled);
        }

        match self.store.find_request(request_id).await? {
            Some(request) if request.is_owned_by(user_id) => {
                validate_transition(request.status, CancellationStatus::Cancelled)?;
                Err(CoreError::Conflict(format!(
                    "Cancellation request {request_id} changed while withdrawing"
                )))
            }
            _ => Err(CoreError::request_not_found(request_id)),
        }
    }

    /// Owner-scoped read.
    pub async fn get(
        &self,
        request_id: DbId,
        user_id: DbId,
    ) -> Result<CancellationRequest, CoreError> {
        self.store
            .find_request(request_id)
            .await?
            .filter(|r| r.is_owned_by(user_id))
            .ok_or_else(|| CoreError::request_not_found(request_id))
    }

    /// The audit trail of an owned request, oldest first.
    pub async fn logs(
        &self,
        request_id: DbId,
        user_id: DbId,
    ) -> Result<Vec<CancellationLog>, CoreError> {
        self.get(request_id, user_id).await?;
        Ok(self.store.list_logs(request_id).await?)
    }

    pub async fn orchestration_status(
        &self,
        orchestration_id: DbId,
        user_id: DbId,
    ) -> Result<OrchestrationView, CoreError> {
        let orchestration = self
            .store
            .find_orchestration(orchestration_id)
            .await?
            .filter(|o| o.user_id == user_id)
            .ok_or(CoreError::NotFound {
                entity: "orchestration",
                id: orchestration_id,
            })?;

        let members = self.store.list_by_orchestration(orchestration_id).await?;
        let statuses: Vec<CancellationStatus> = members.iter().map(|m| m.status).collect();
        Ok(OrchestrationView {
            orchestration,
            status: aggregate_status(&statuses),
            members,
        })
    }
}

fn success_entry(attempt: u32, success: ExecutorSuccess) -> NewLogEntry {
    match success {
        ExecutorSuccess::Cancelled { detail: None } => {
            NewLogEntry::info(format!("attempt {attempt} succeeded"))
        }
        ExecutorSuccess::Cancelled {
            detail: Some(detail),
        } => NewLogEntry::info(format!("attempt {attempt} succeeded: {detail}")),
        ExecutorSuccess::ActionRequired { instructions } => NewLogEntry::warn(format!(
            "attempt {attempt} succeeded: action required\n{instructions}"
        )),
    }
}

fn outcome_label(outcome: &RunOutcome) -> &'static str {
    match outcome {
        RunOutcome::NotClaimed => "not_claimed",
        RunOutcome::Finished(_) => "finished",
        RunOutcome::Interrupted => "interrupted",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_entries() {
        assert_eq!(
            success_entry(3, ExecutorSuccess::Cancelled { detail: None }).message,
            "attempt 3 succeeded"
        );
        assert_eq!(
            success_entry(
                1,
                ExecutorSuccess::Cancelled {
                    detail: Some("confirmation c-1".into())
                }
            )
            .message,
            "attempt 1 succeeded: confirmation c-1"
        );

        let manual = success_entry(
            1,
            ExecutorSuccess::ActionRequired {
                instructions: "1. Sign in".into(),
            },
        );
        assert_eq!(manual.level, unsub_core::cancellation::LogLevel::Warn);
        assert_eq!(manual.message, "attempt 1 succeeded: action required\n1. Sign in");
    }
}
