//! Strategy executors.
//!
//! Each executor attempts to cancel one subscription via one method and
//! reports back in the shared [`ExecutorSuccess`] / [`ExecutorError`] shape,
//! so retry and fallback in the orchestrator stay strategy-agnostic.

pub mod api;
pub mod automation;
pub mod http;
pub mod manual;

use std::any::Any;
use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures::FutureExt;
use unsub_core::cancellation::CancellationMethod;
use unsub_core::types::DbId;

use crate::catalog::Subscription;

pub use api::{ApiExecutor, ProviderClient, ProviderError, RemoteState};
pub use automation::{
    AcquirePolicy, AutomationExecutor, AutomationScript, ScriptRegistry, SessionPool, SessionSlot,
};
pub use http::HttpProviderClient;
pub use manual::ManualExecutor;

/// Per-attempt information handed to an executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptContext {
    pub request_id: DbId,
    pub user_id: DbId,
    /// 1-based attempt number within the current strategy.
    pub attempt: u32,
}

/// Successful outcome of an attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutorSuccess {
    /// The provider confirmed the subscription is cancelled.
    Cancelled { detail: Option<String> },
    /// No remote effect; the user has to finish the cancellation themselves.
    ActionRequired { instructions: String },
}

/// How the orchestrator reacts to a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Retry the same strategy after backoff.
    Transient,
    /// Abandon the strategy without further attempts.
    Permanent,
    /// Retry after the session-pool delay rather than provider backoff.
    SessionUnavailable,
}

/// Failure of a single attempt, already classified at the executor boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutorError {
    #[error("provider temporarily unavailable: {0}")]
    TransientProvider(String),

    #[error("provider rejected cancellation: {0}")]
    PermanentProvider(String),

    #[error("automation timed out after {0}s")]
    AutomationTimeout(u64),

    #[error("no automation session available")]
    SessionUnavailable,

    #[error("internal executor error: {0}")]
    Internal(String),
}

impl ExecutorError {
    pub fn classification(&self) -> FailureClass {
        match self {
            Self::TransientProvider(_) | Self::AutomationTimeout(_) | Self::Internal(_) => {
                FailureClass::Transient
            }
            Self::PermanentProvider(_) => FailureClass::Permanent,
            Self::SessionUnavailable => FailureClass::SessionUnavailable,
        }
    }
}

#[async_trait]
pub trait CancellationExecutor: Send + Sync {
    fn method(&self) -> CancellationMethod;

    async fn execute(
        &self,
        subscription: &Subscription,
        ctx: &AttemptContext,
    ) -> Result<ExecutorSuccess, ExecutorError>;
}

/// Run one attempt, turning a panic inside the executor into
/// [`ExecutorError::Internal`].
pub async fn execute_guarded(
    executor: &dyn CancellationExecutor,
    subscription: &Subscription,
    ctx: &AttemptContext,
) -> Result<ExecutorSuccess, ExecutorError> {
    match AssertUnwindSafe(executor.execute(subscription, ctx))
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            tracing::error!(
                request_id = ctx.request_id,
                attempt = ctx.attempt,
                method = %executor.method(),
                panic = %message,
                "Executor panicked",
            );
            Err(ExecutorError::Internal(message))
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "executor panicked".to_string()
    }
}
