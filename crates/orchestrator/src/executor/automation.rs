//! Scripted-session strategy and its bounded session pool.
//!
//! An automation attempt holds a [`SessionSlot`] for its whole duration.
//! The slot is an RAII guard over a semaphore permit: it is returned to the
//! pool when dropped, which covers success, error, timeout (the script
//! future is dropped) and panics unwinding through the executor.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use unsub_core::cancellation::CancellationMethod;

use super::{AttemptContext, CancellationExecutor, ExecutorError, ExecutorSuccess};
use crate::catalog::Subscription;

// ---------------------------------------------------------------------------
// Session pool
// ---------------------------------------------------------------------------

/// What [`SessionPool::acquire`] does when every slot is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquirePolicy {
    /// Wait up to the given duration for a slot.
    Wait(Duration),
    /// Return [`ExecutorError::SessionUnavailable`] immediately.
    FailFast,
}

/// Bounded pool of automation sessions.
pub struct SessionPool {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    policy: AcquirePolicy,
    in_use: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    next_session_id: AtomicU64,
}

impl SessionPool {
    pub fn new(capacity: usize, policy: AcquirePolicy) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            policy,
            in_use: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            next_session_id: AtomicU64::new(1),
        }
    }

    pub async fn acquire(&self) -> Result<SessionSlot, ExecutorError> {
        let permit = match self.policy {
            AcquirePolicy::FailFast => self
                .semaphore
                .clone()
                .try_acquire_owned()
                .map_err(|_| ExecutorError::SessionUnavailable)?,
            AcquirePolicy::Wait(limit) => {
                match tokio::time::timeout(limit, self.semaphore.clone().acquire_owned()).await {
                    Ok(Ok(permit)) => permit,
                    Ok(Err(_)) | Err(_) => return Err(ExecutorError::SessionUnavailable),
                }
            }
        };

        let now_in_use = self.in_use.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now_in_use, Ordering::SeqCst);
        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(session_id, in_use = now_in_use, "Automation session acquired");

        Ok(SessionSlot {
            session_id,
            in_use: Arc::clone(&self.in_use),
            _permit: permit,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently held.
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::SeqCst)
    }

    /// Highest number of slots held at once since the pool was created.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// A held automation session. Released on drop.
pub struct SessionSlot {
    session_id: u64,
    in_use: Arc<AtomicUsize>,
    _permit: OwnedSemaphorePermit,
}

impl SessionSlot {
    pub fn session_id(&self) -> u64 {
        self.session_id
    }
}

impl Drop for SessionSlot {
    fn drop(&mut self) {
        // Runs before the permit field is dropped, so `in_use` never
        // counts a slot whose permit is already back in the semaphore.
        self.in_use.fetch_sub(1, Ordering::SeqCst);
        tracing::debug!(session_id = self.session_id, "Automation session released");
    }
}

// ---------------------------------------------------------------------------
// Scripts
// ---------------------------------------------------------------------------

/// A provider-specific scripted cancellation flow.
#[async_trait]
pub trait AutomationScript: Send + Sync {
    /// Drive the provider's UI within `session`. Returns an optional detail
    /// (e.g. a confirmation number scraped from the page).
    async fn run(
        &self,
        session: &SessionSlot,
        subscription: &Subscription,
    ) -> Result<Option<String>, ExecutorError>;
}

/// Scripts keyed by [`Subscription::provider`].
#[derive(Default, Clone)]
pub struct ScriptRegistry {
    scripts: HashMap<String, Arc<dyn AutomationScript>>,
}

impl ScriptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, provider: impl Into<String>, script: Arc<dyn AutomationScript>) -> Self {
        self.scripts.insert(provider.into(), script);
        self
    }

    pub fn get(&self, provider: &str) -> Option<Arc<dyn AutomationScript>> {
        self.scripts.get(provider).cloned()
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

pub struct AutomationExecutor {
    pool: Arc<SessionPool>,
    scripts: ScriptRegistry,
    timeout: Duration,
}

impl AutomationExecutor {
    pub fn new(pool: Arc<SessionPool>, scripts: ScriptRegistry, timeout: Duration) -> Self {
        Self {
            pool,
            scripts,
            timeout,
        }
    }

    pub fn pool(&self) -> &Arc<SessionPool> {
        &self.pool
    }
}

#[async_trait]
impl CancellationExecutor for AutomationExecutor {
    fn method(&self) -> CancellationMethod {
        CancellationMethod::Automation
    }

    async fn execute(
        &self,
        subscription: &Subscription,
        ctx: &AttemptContext,
    ) -> Result<ExecutorSuccess, ExecutorError> {
        let script = self.scripts.get(&subscription.provider).ok_or_else(|| {
            ExecutorError::PermanentProvider(format!(
                "no automation script for provider '{}'",
                subscription.provider
            ))
        })?;

        let slot = self.pool.acquire().await?;
        let result = tokio::time::timeout(self.timeout, script.run(&slot, subscription)).await;
        let session_id = slot.session_id();
        drop(slot);

        match result {
            Ok(Ok(detail)) => Ok(ExecutorSuccess::Cancelled { detail }),
            Ok(Err(err)) => Err(err),
            Err(_) => {
                tracing::warn!(
                    request_id = ctx.request_id,
                    session_id,
                    timeout_secs = self.timeout.as_secs(),
                    "Automation session timed out",
                );
                Err(ExecutorError::AutomationTimeout(self.timeout.as_secs()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Sleepy(Duration);

    #[async_trait]
    impl AutomationScript for Sleepy {
        async fn run(
            &self,
            _session: &SessionSlot,
            _subscription: &Subscription,
        ) -> Result<Option<String>, ExecutorError> {
            tokio::time::sleep(self.0).await;
            Ok(Some("ref 77".to_string()))
        }
    }

    fn subscription(provider: &str) -> Subscription {
        Subscription {
            id: "sub-1".to_string(),
            provider: provider.to_string(),
            display_name: "Gym".to_string(),
            external_ref: "gym-1".to_string(),
            methods: vec![CancellationMethod::Automation],
            cancel_url: Some("https://gym.test/account".to_string()),
            support_contact: None,
        }
    }

    fn ctx() -> AttemptContext {
        AttemptContext {
            request_id: 1,
            user_id: 1,
            attempt: 1,
        }
    }

    fn executor(script_time: Duration, timeout: Duration) -> AutomationExecutor {
        let pool = Arc::new(SessionPool::new(1, AcquirePolicy::FailFast));
        let scripts = ScriptRegistry::new().register("gym", Arc::new(Sleepy(script_time)));
        AutomationExecutor::new(pool, scripts, timeout)
    }

    #[tokio::test]
    async fn fail_fast_pool_reports_unavailable() {
        let pool = SessionPool::new(1, AcquirePolicy::FailFast);
        let held = pool.acquire().await.unwrap();
        assert!(matches!(
            pool.acquire().await,
            Err(ExecutorError::SessionUnavailable)
        ));
        drop(held);
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_pool_gives_up_after_limit() {
        let pool = SessionPool::new(1, AcquirePolicy::Wait(Duration::from_secs(2)));
        let _held = pool.acquire().await.unwrap();
        assert!(matches!(
            pool.acquire().await,
            Err(ExecutorError::SessionUnavailable)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn success_releases_slot() {
        let executor = executor(Duration::from_secs(1), Duration::from_secs(10));
        let outcome = executor.execute(&subscription("gym"), &ctx()).await.unwrap();

        assert_eq!(
            outcome,
            ExecutorSuccess::Cancelled {
                detail: Some("ref 77".to_string())
            }
        );
        assert_eq!(executor.pool().in_use(), 0);
        assert_eq!(executor.pool().available(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_transient_and_releases_slot() {
        let executor = executor(Duration::from_secs(60), Duration::from_secs(5));
        let err = executor
            .execute(&subscription("gym"), &ctx())
            .await
            .unwrap_err();

        assert_eq!(err, ExecutorError::AutomationTimeout(5));
        assert_eq!(executor.pool().in_use(), 0);
        assert_eq!(executor.pool().available(), 1);
    }

    #[tokio::test]
    async fn unknown_provider_is_permanent() {
        let executor = executor(Duration::ZERO, Duration::from_secs(5));
        let err = executor
            .execute(&subscription("unknown"), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::PermanentProvider(_)));
        assert_eq!(executor.pool().peak(), 0);
    }
}
