//! Shared fixtures for orchestrator integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use unsub_core::cancellation::{CancellationMethod, CancellationStatus};
use unsub_core::retry::RetryPolicy;
use unsub_core::types::DbId;
use unsub_db::models::CancellationRequest;
use unsub_db::{CancellationStore, MemoryCancellationStore};
use unsub_orchestrator::executor::{
    AcquirePolicy, ApiExecutor, AutomationExecutor, AutomationScript, ExecutorError,
    ManualExecutor, ProviderClient, ProviderError, RemoteState, ScriptRegistry, SessionPool,
    SessionSlot,
};
use unsub_orchestrator::notify::CancellationNotifier;
use unsub_orchestrator::{Executors, Orchestrator, StaticCatalog, Subscription};

pub const USER: DbId = 1;
pub const OTHER_USER: DbId = 2;

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// Provider whose `fetch_state` answers come from a script, then a default.
pub struct ScriptedProvider {
    scripted: Mutex<VecDeque<Result<RemoteState, ProviderError>>>,
    fallback: Result<RemoteState, ProviderError>,
    pub fetch_calls: AtomicUsize,
    pub cancel_calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(
        scripted: impl IntoIterator<Item = Result<RemoteState, ProviderError>>,
        fallback: Result<RemoteState, ProviderError>,
    ) -> Self {
        Self {
            scripted: Mutex::new(scripted.into_iter().collect()),
            fallback,
            fetch_calls: AtomicUsize::new(0),
            cancel_calls: AtomicUsize::new(0),
        }
    }

    pub fn healthy() -> Self {
        Self::new([], Ok(RemoteState::Active))
    }

    pub fn fetches(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn cancels(&self) -> usize {
        self.cancel_calls.load(Ordering::SeqCst)
    }
}

pub fn unavailable() -> ProviderError {
    ProviderError::Transient("503 Service Unavailable".to_string())
}

#[async_trait]
impl ProviderClient for ScriptedProvider {
    async fn fetch_state(&self, _external_ref: &str) -> Result<RemoteState, ProviderError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.scripted.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }

    async fn request_cancel(&self, _external_ref: &str) -> Result<Option<String>, ProviderError> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    }
}

// ---------------------------------------------------------------------------
// Automation
// ---------------------------------------------------------------------------

/// Script that succeeds after a short simulated session.
pub struct QuickScript;

#[async_trait]
impl AutomationScript for QuickScript {
    async fn run(
        &self,
        _session: &SessionSlot,
        _subscription: &Subscription,
    ) -> Result<Option<String>, ExecutorError> {
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(None)
    }
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingNotifier {
    pub seen: Mutex<Vec<(DbId, CancellationStatus)>>,
}

impl RecordingNotifier {
    pub fn seen(&self) -> Vec<(DbId, CancellationStatus)> {
        self.seen.lock().unwrap().clone()
    }
}

impl CancellationNotifier for RecordingNotifier {
    fn notify(&self, request: &CancellationRequest) {
        self.seen.lock().unwrap().push((request.id, request.status));
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub store: Arc<MemoryCancellationStore>,
    pub orchestrator: Arc<Orchestrator>,
    pub provider: Arc<ScriptedProvider>,
    pub pool: Arc<SessionPool>,
    pub notifier: Arc<RecordingNotifier>,
}

fn subscription(id: &str, provider: &str, methods: &[CancellationMethod]) -> Subscription {
    Subscription {
        id: id.to_string(),
        provider: provider.to_string(),
        display_name: format!("{provider} plan"),
        external_ref: format!("ext-{id}"),
        methods: methods.to_vec(),
        cancel_url: Some(format!("https://{provider}.test/account")),
        support_contact: None,
    }
}

pub fn catalog() -> StaticCatalog {
    use CancellationMethod::*;
    StaticCatalog::new([
        subscription("sub-42", "streamflix", &[Api, Automation, Manual]),
        subscription("sub-gym", "gym", &[Automation, Manual]),
        subscription("sub-paper", "paper", &[Manual]),
        subscription("sub-music", "tunes", &[Api, Manual]),
    ])
}

pub fn retry_policy() -> RetryPolicy {
    RetryPolicy {
        jitter: 0.0,
        ..RetryPolicy::default()
    }
}

pub fn harness(provider: ScriptedProvider) -> Harness {
    harness_with_script(provider, Arc::new(QuickScript))
}

pub fn harness_with_script(provider: ScriptedProvider, script: Arc<dyn AutomationScript>) -> Harness {
    let store = Arc::new(MemoryCancellationStore::new());
    let provider = Arc::new(provider);
    let pool = Arc::new(SessionPool::new(2, AcquirePolicy::FailFast));
    let notifier = Arc::new(RecordingNotifier::default());

    let scripts = ScriptRegistry::new()
        .register("streamflix", Arc::clone(&script))
        .register("gym", script);
    let executors = Executors {
        api: Arc::new(ApiExecutor::new(provider.clone())),
        automation: Arc::new(AutomationExecutor::new(
            Arc::clone(&pool),
            scripts,
            Duration::from_secs(30),
        )),
        manual: Arc::new(ManualExecutor),
    };

    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        Arc::new(catalog()),
        executors,
        notifier.clone(),
        retry_policy(),
    ));

    Harness {
        store,
        orchestrator,
        provider,
        pool,
        notifier,
    }
}

impl Harness {
    pub async fn request(&self, id: DbId) -> CancellationRequest {
        self.store.find_request(id).await.unwrap().unwrap()
    }

    pub async fn messages(&self, id: DbId) -> Vec<String> {
        self.store
            .list_logs(id)
            .await
            .unwrap()
            .into_iter()
            .map(|l| l.message)
            .collect()
    }
}
