//! The automation pool never hands out more than its capacity and gets
//! every slot back, whatever the script does.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use unsub_core::cancellation::CancellationMethod;
use unsub_orchestrator::executor::{
    execute_guarded, AcquirePolicy, AttemptContext, AutomationExecutor, AutomationScript,
    ExecutorError, ScriptRegistry, SessionPool, SessionSlot,
};
use unsub_orchestrator::Subscription;

const CAPACITY: usize = 3;

/// Behaviour picked from the external ref, so each task injects a
/// different fault.
struct FaultyScript {
    pool: Arc<SessionPool>,
    max_seen: AtomicUsize,
}

#[async_trait]
impl AutomationScript for FaultyScript {
    async fn run(
        &self,
        _session: &SessionSlot,
        subscription: &Subscription,
    ) -> Result<Option<String>, ExecutorError> {
        self.max_seen.fetch_max(self.pool.in_use(), Ordering::SeqCst);
        let n: u64 = subscription.external_ref.parse().unwrap();
        tokio::time::sleep(Duration::from_millis(100 * (n % 5 + 1))).await;
        match n % 4 {
            0 => Ok(Some(format!("ref {n}"))),
            1 => Err(ExecutorError::TransientProvider("page failed to load".into())),
            2 => {
                // Longer than the executor timeout.
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(None)
            }
            _ => panic!("script crashed on step {n}"),
        }
    }
}

fn subscription(n: usize) -> Subscription {
    Subscription {
        id: format!("sub-{n}"),
        provider: "gym".to_string(),
        display_name: "Gym".to_string(),
        external_ref: n.to_string(),
        methods: vec![CancellationMethod::Automation],
        cancel_url: None,
        support_contact: None,
    }
}

#[tokio::test(start_paused = true)]
async fn pool_stays_bounded_and_drains_under_faults() {
    let pool = Arc::new(SessionPool::new(
        CAPACITY,
        AcquirePolicy::Wait(Duration::from_secs(600)),
    ));
    let script = Arc::new(FaultyScript {
        pool: Arc::clone(&pool),
        max_seen: AtomicUsize::new(0),
    });
    let executor = Arc::new(AutomationExecutor::new(
        Arc::clone(&pool),
        ScriptRegistry::new().register("gym", script.clone()),
        Duration::from_secs(5),
    ));

    let tasks = (0..24).map(|n| {
        let executor = Arc::clone(&executor);
        tokio::spawn(async move {
            let ctx = AttemptContext {
                request_id: n as i64,
                user_id: 1,
                attempt: 1,
            };
            execute_guarded(executor.as_ref(), &subscription(n), &ctx).await
        })
    });
    let results: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    assert!(pool.peak() <= CAPACITY);
    assert!(script.max_seen.load(Ordering::SeqCst) <= CAPACITY);
    assert_eq!(pool.in_use(), 0);
    assert_eq!(pool.available(), CAPACITY);

    let timeouts = results
        .iter()
        .filter(|r| matches!(r, Err(ExecutorError::AutomationTimeout(5))))
        .count();
    let panics = results
        .iter()
        .filter(|r| matches!(r, Err(ExecutorError::Internal(_))))
        .count();
    let successes = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(timeouts, 6);
    assert_eq!(panics, 6);
    assert_eq!(successes, 6);
}

#[tokio::test]
async fn fail_fast_pool_rejects_when_full() {
    let pool = SessionPool::new(1, AcquirePolicy::FailFast);
    let _held = pool.acquire().await.unwrap();

    let err = pool.acquire().await.err().unwrap();
    assert_eq!(err, ExecutorError::SessionUnavailable);
    assert_eq!(pool.in_use(), 1);
}
