use std::sync::Arc;

use unsub_db::CancellationStore;
use unsub_orchestrator::{Orchestrator, StatusPublisher};

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable; everything is behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Source of truth for requests and logs.
    pub store: Arc<dyn CancellationStore>,
    pub config: Arc<ServerConfig>,
    pub orchestrator: Arc<Orchestrator>,
    /// Serves the SSE status streams.
    pub publisher: Arc<StatusPublisher>,
}
