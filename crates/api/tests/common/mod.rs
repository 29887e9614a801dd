#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;
use unsub_api::auth::jwt::{generate_access_token, JwtConfig};
use unsub_api::config::ServerConfig;
use unsub_api::router::build_app_router;
use unsub_api::state::AppState;
use unsub_core::cancellation::CancellationMethod;
use unsub_core::retry::RetryPolicy;
use unsub_core::types::DbId;
use unsub_db::MemoryCancellationStore;
use unsub_orchestrator::executor::{
    AcquirePolicy, ApiExecutor, AutomationExecutor, ManualExecutor, ProviderClient,
    ProviderError, RemoteState, ScriptRegistry, SessionPool,
};
use unsub_orchestrator::notify::NoopNotifier;
use unsub_orchestrator::{
    Executors, Orchestrator, OrchestratorConfig, StaticCatalog, StatusPublisher, Subscription,
};

pub const USER: DbId = 1;
pub const OTHER_USER: DbId = 2;

/// How the fake provider answers every call.
#[derive(Clone, Copy)]
pub enum ProviderMode {
    Healthy,
    /// Always 503; with the long test backoff, requests sit `in_progress`.
    Down,
}

pub struct FakeProvider {
    mode: ProviderMode,
    pub calls: AtomicUsize,
}

#[async_trait]
impl ProviderClient for FakeProvider {
    async fn fetch_state(&self, _external_ref: &str) -> Result<RemoteState, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            ProviderMode::Healthy => Ok(RemoteState::Active),
            ProviderMode::Down => Err(ProviderError::Transient(
                "503 Service Unavailable".to_string(),
            )),
        }
    }

    async fn request_cancel(&self, _external_ref: &str) -> Result<Option<String>, ProviderError> {
        Ok(Some("CX-1".to_string()))
    }
}

pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        jwt: JwtConfig {
            secret: "test-secret-that-is-long-enough-for-hmac".to_string(),
            access_token_expiry_mins: 15,
        },
        orchestrator: OrchestratorConfig::default(),
    }
}

fn subscription(id: &str, provider: &str, methods: &[CancellationMethod]) -> Subscription {
    Subscription {
        id: id.to_string(),
        provider: provider.to_string(),
        display_name: format!("{provider} plan"),
        external_ref: format!("ext-{id}"),
        methods: methods.to_vec(),
        cancel_url: None,
        support_contact: None,
    }
}

pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryCancellationStore>,
    pub config: ServerConfig,
}

impl TestApp {
    pub fn token(&self, user_id: DbId) -> String {
        generate_access_token(user_id, &self.config.jwt).unwrap()
    }
}

/// Build the full application router over the in-memory store.
pub fn build_test_app(mode: ProviderMode) -> TestApp {
    use CancellationMethod::*;

    let config = test_config();
    let store = Arc::new(MemoryCancellationStore::new());
    let provider = Arc::new(FakeProvider {
        mode,
        calls: AtomicUsize::new(0),
    });

    let executors = Executors {
        api: Arc::new(ApiExecutor::new(provider)),
        automation: Arc::new(AutomationExecutor::new(
            Arc::new(SessionPool::new(1, AcquirePolicy::FailFast)),
            ScriptRegistry::new(),
            Duration::from_secs(5),
        )),
        manual: Arc::new(ManualExecutor),
    };
    let catalog = StaticCatalog::new([
        subscription("sub-42", "streamflix", &[Api, Manual]),
        subscription("sub-music", "tunes", &[Api, Manual]),
        subscription("sub-paper", "paper", &[Manual]),
    ]);
    let retry = RetryPolicy {
        max_attempts: 2,
        initial_delay: Duration::from_secs(600),
        max_delay: Duration::from_secs(600),
        jitter: 0.0,
        ..RetryPolicy::default()
    };
    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        Arc::new(catalog),
        executors,
        Arc::new(NoopNotifier),
        retry,
    ));

    let state = AppState {
        store: store.clone(),
        config: Arc::new(config.clone()),
        orchestrator,
        publisher: Arc::new(StatusPublisher::new(
            store.clone(),
            Duration::from_secs(2),
        )),
    };

    TestApp {
        router: build_app_router(state, &config),
        store,
        config,
    }
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn send(
    app: &TestApp,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<serde_json::Value>,
) -> Response<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    app.router
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap()
}

pub async fn get(app: &TestApp, uri: &str, token: &str) -> Response<Body> {
    send(app, Method::GET, uri, Some(token), None).await
}

pub async fn post_json(
    app: &TestApp,
    uri: &str,
    token: &str,
    body: serde_json::Value,
) -> Response<Body> {
    send(app, Method::POST, uri, Some(token), Some(body)).await
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Poll `GET /cancellations/{id}` until its status is `expected`.
pub async fn wait_for_status(app: &TestApp, id: i64, token: &str, expected: &str) -> serde_json::Value {
    for _ in 0..200 {
        let json = body_json(get(app, &format!("/api/v1/cancellations/{id}"), token).await).await;
        if json["data"]["status"] == expected {
            return json["data"].clone();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("request {id} never reached {expected}");
}
