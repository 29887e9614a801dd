//! Direct provider API strategy.
//!
//! Read-then-act: the remote state is fetched first and the mutating call is
//! only issued while the subscription is still active, so a retry after a
//! lost response never cancels twice.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use unsub_core::cancellation::CancellationMethod;

use super::{AttemptContext, CancellationExecutor, ExecutorError, ExecutorSuccess};
use crate::catalog::Subscription;

/// Subscription state as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteState {
    Active,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("{0}")]
    Transient(String),

    #[error("{0}")]
    Permanent(String),
}

impl From<ProviderError> for ExecutorError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Transient(msg) => ExecutorError::TransientProvider(msg),
            ProviderError::Permanent(msg) => ExecutorError::PermanentProvider(msg),
        }
    }
}

/// The provider's cancellation API.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    async fn fetch_state(&self, external_ref: &str) -> Result<RemoteState, ProviderError>;

    /// Issue the cancel call. Returns the provider's confirmation id, if any.
    async fn request_cancel(&self, external_ref: &str) -> Result<Option<String>, ProviderError>;
}

pub struct ApiExecutor {
    client: Arc<dyn ProviderClient>,
}

impl ApiExecutor {
    pub fn new(client: Arc<dyn ProviderClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CancellationExecutor for ApiExecutor {
    fn method(&self) -> CancellationMethod {
        CancellationMethod::Api
    }

    async fn execute(
        &self,
        subscription: &Subscription,
        ctx: &AttemptContext,
    ) -> Result<ExecutorSuccess, ExecutorError> {
        let state = self.client.fetch_state(&subscription.external_ref).await?;
        if state == RemoteState::Cancelled {
            tracing::info!(
                request_id = ctx.request_id,
                external_ref = %subscription.external_ref,
                "Subscription already cancelled at provider",
            );
            return Ok(ExecutorSuccess::Cancelled {
                detail: Some("already cancelled at provider".to_string()),
            });
        }

        let confirmation = self
            .client
            .request_cancel(&subscription.external_ref)
            .await?;
        tracing::info!(
            request_id = ctx.request_id,
            attempt = ctx.attempt,
            confirmation = ?confirmation,
            "Provider accepted cancellation",
        );

        Ok(ExecutorSuccess::Cancelled {
            detail: confirmation.map(|id| format!("confirmation {id}")),
        })
    }
}
