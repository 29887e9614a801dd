//! Wiring shared by the API server and the worker binaries.

use std::path::Path;
use std::sync::Arc;

use unsub_db::CancellationStore;

use crate::catalog::{StaticCatalog, Subscription};
use crate::config::OrchestratorConfig;
use crate::executor::{
    ApiExecutor, AutomationExecutor, HttpProviderClient, ManualExecutor, ScriptRegistry,
    SessionPool,
};
use crate::notify::CancellationNotifier;
use crate::orchestrator::{Executors, Orchestrator};

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("Failed to read subscription catalog: {0}")]
    CatalogIo(#[from] std::io::Error),

    #[error("Invalid subscription catalog: {0}")]
    CatalogFormat(#[from] serde_json::Error),

    #[error("Failed to build provider HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Load a catalog from a JSON array of [`Subscription`]s.
pub async fn load_catalog(path: Option<&Path>) -> Result<StaticCatalog, BootstrapError> {
    let Some(path) = path else {
        tracing::warn!("SUBSCRIPTION_CATALOG_PATH not set, starting with an empty catalog");
        return Ok(StaticCatalog::default());
    };
    let raw = tokio::fs::read_to_string(path).await?;
    let entries: Vec<Subscription> = serde_json::from_str(&raw)?;
    tracing::info!(path = %path.display(), entries = entries.len(), "Subscription catalog loaded");
    Ok(StaticCatalog::new(entries))
}

/// Build an orchestrator whose API strategy talks to the configured
/// provider endpoint and whose automation strategy draws from a pool of
/// `automation_pool_size` sessions.
pub fn build_orchestrator(
    config: &OrchestratorConfig,
    store: Arc<dyn CancellationStore>,
    catalog: Arc<StaticCatalog>,
    notifier: Arc<dyn CancellationNotifier>,
    scripts: ScriptRegistry,
) -> Result<Orchestrator, BootstrapError> {
    let client = HttpProviderClient::new(
        config.provider_api_base_url.clone(),
        config.provider_api_timeout,
    )?;
    let pool = Arc::new(SessionPool::new(
        config.automation_pool_size,
        config.automation_acquire,
    ));

    let executors = Executors {
        api: Arc::new(ApiExecutor::new(Arc::new(client))),
        automation: Arc::new(AutomationExecutor::new(
            pool,
            scripts,
            config.automation_timeout,
        )),
        manual: Arc::new(ManualExecutor),
    };

    Ok(Orchestrator::new(
        store,
        catalog,
        executors,
        notifier,
        config.retry.clone(),
    ))
}
