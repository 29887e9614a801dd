//! Headless orchestrator instance.
//!
//! Runs the pending dispatcher and the stale reaper against the shared
//! store. Any number of workers can run next to the API servers; claims
//! are compare-and-swap on the stored status, so each request executes
//! once.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use unsub_db::{CancellationStore, PgCancellationStore};
use unsub_events::{EventBus, NotificationRelay};
use unsub_orchestrator::bootstrap::{build_orchestrator, load_catalog};
use unsub_orchestrator::dispatcher::PendingDispatcher;
use unsub_orchestrator::executor::ScriptRegistry;
use unsub_orchestrator::notify::EventBusNotifier;
use unsub_orchestrator::reaper::StaleReaper;
use unsub_orchestrator::OrchestratorConfig;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "unsub_worker=debug,unsub_orchestrator=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config =
        OrchestratorConfig::from_env().unwrap_or_else(|e| panic!("Invalid configuration: {e}"));

    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = unsub_db::create_pool(&database_url)
        .await
        .expect("Failed to connect to database");
    unsub_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database ready");

    let store: Arc<dyn CancellationStore> = Arc::new(PgCancellationStore::new(pool));

    let event_bus = Arc::new(EventBus::default());
    let relay_handle = tokio::spawn(NotificationRelay::run(event_bus.subscribe()));
    let notifier = Arc::new(EventBusNotifier::new(Arc::clone(&event_bus)));

    let catalog = Arc::new(
        load_catalog(config.catalog_path.as_deref())
            .await
            .expect("Failed to load subscription catalog"),
    );
    let orchestrator = Arc::new(
        build_orchestrator(
            &config,
            Arc::clone(&store),
            catalog,
            notifier.clone(),
            ScriptRegistry::new(),
        )
        .expect("Failed to build orchestrator"),
    );

    let grace = config.shutdown_timeout;
    let cancel = CancellationToken::new();

    let dispatcher = PendingDispatcher::new(orchestrator, config.dispatch_interval);
    let dispatcher_cancel = cancel.clone();
    let dispatcher_handle = tokio::spawn(async move {
        dispatcher.run(dispatcher_cancel).await;
    });

    let reaper = StaleReaper::new(store, notifier, config.stale_after);
    let reaper_cancel = cancel.clone();
    let reaper_handle = tokio::spawn(async move {
        reaper.run(reaper_cancel).await;
    });

    tracing::info!("Worker started");

    shutdown_signal().await;

    cancel.cancel();
    let _ = tokio::time::timeout(grace, dispatcher_handle).await;
    let _ = tokio::time::timeout(grace, reaper_handle).await;

    drop(event_bus);
    let _ = tokio::time::timeout(grace, relay_handle).await;

    tracing::info!("Worker stopped");
}

/// Wait for SIGINT or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received SIGINT, shutting down"),
        () = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
