use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use unsub_api::config::ServerConfig;
use unsub_api::router::build_app_router;
use unsub_api::state::AppState;
use unsub_db::{CancellationStore, PgCancellationStore};
use unsub_events::{EventBus, NotificationRelay};
use unsub_orchestrator::bootstrap::{build_orchestrator, load_catalog};
use unsub_orchestrator::dispatcher::PendingDispatcher;
use unsub_orchestrator::executor::ScriptRegistry;
use unsub_orchestrator::notify::EventBusNotifier;
use unsub_orchestrator::reaper::StaleReaper;
use unsub_orchestrator::StatusPublisher;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "unsub_api=debug,unsub_orchestrator=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = unsub_db::create_pool(&database_url)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    unsub_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    tracing::info!("Database health check passed");

    unsub_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    let store: Arc<dyn CancellationStore> = Arc::new(PgCancellationStore::new(pool));

    // --- Event bus ---
    let event_bus = Arc::new(EventBus::default());
    let relay_handle = tokio::spawn(NotificationRelay::run(event_bus.subscribe()));
    let notifier = Arc::new(EventBusNotifier::new(Arc::clone(&event_bus)));

    // --- Orchestrator ---
    let catalog = Arc::new(
        load_catalog(config.orchestrator.catalog_path.as_deref())
            .await
            .expect("Failed to load subscription catalog"),
    );
    let orchestrator = Arc::new(
        build_orchestrator(
            &config.orchestrator,
            Arc::clone(&store),
            catalog,
            notifier.clone(),
            ScriptRegistry::new(),
        )
        .expect("Failed to build orchestrator"),
    );
    let publisher = Arc::new(StatusPublisher::new(
        Arc::clone(&store),
        config.orchestrator.stream_poll_interval,
    ));

    // --- Background loops ---
    let background_cancel = CancellationToken::new();

    let dispatcher = PendingDispatcher::new(
        Arc::clone(&orchestrator),
        config.orchestrator.dispatch_interval,
    );
    let dispatcher_cancel = background_cancel.clone();
    let dispatcher_handle = tokio::spawn(async move {
        dispatcher.run(dispatcher_cancel).await;
    });

    let reaper = StaleReaper::new(
        Arc::clone(&store),
        notifier,
        config.orchestrator.stale_after,
    );
    let reaper_cancel = background_cancel.clone();
    let reaper_handle = tokio::spawn(async move {
        reaper.run(reaper_cancel).await;
    });

    tracing::info!("Background services started (dispatcher, stale reaper, notification relay)");

    // --- App state ---
    let state = AppState {
        store,
        config: Arc::new(config.clone()),
        orchestrator,
        publisher,
    };
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");
    let grace = config.orchestrator.shutdown_timeout;

    background_cancel.cancel();
    let _ = tokio::time::timeout(grace, dispatcher_handle).await;
    let _ = tokio::time::timeout(grace, reaper_handle).await;
    tracing::info!("Background loops stopped");

    // Requests still running keep their own notifier clone; dropping ours
    // lets the relay finish once they are done.
    drop(event_bus);
    let _ = tokio::time::timeout(grace, relay_handle).await;

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
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
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
