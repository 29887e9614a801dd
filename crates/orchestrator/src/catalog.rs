//! Subscription catalog collaborator.
//!
//! The catalog owns provider metadata; the orchestrator only asks it which
//! strategies apply to a subscription and where to point them.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use unsub_core::cancellation::CancellationMethod;

/// Provider metadata for one subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    /// Provider key, e.g. `"streamflix"`. Selects the automation script.
    pub provider: String,
    pub display_name: String,
    /// Identifier of the subscription on the provider's side.
    pub external_ref: String,
    /// Strategies the provider supports for this subscription.
    pub methods: Vec<CancellationMethod>,
    pub cancel_url: Option<String>,
    pub support_contact: Option<String>,
}

impl Subscription {
    pub fn supports(&self, method: CancellationMethod) -> bool {
        self.methods.contains(&method)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Subscription catalog unavailable: {0}")]
pub struct CatalogError(pub String);

#[async_trait]
pub trait SubscriptionCatalog: Send + Sync {
    async fn lookup(&self, subscription_id: &str) -> Result<Option<Subscription>, CatalogError>;
}

/// In-memory catalog for development and tests.
#[derive(Default)]
pub struct StaticCatalog {
    entries: RwLock<HashMap<String, Subscription>>,
}

impl StaticCatalog {
    pub fn new(entries: impl IntoIterator<Item = Subscription>) -> Self {
        Self {
            entries: RwLock::new(entries.into_iter().map(|s| (s.id.clone(), s)).collect()),
        }
    }

    pub async fn insert(&self, subscription: Subscription) {
        self.entries
            .write()
            .await
            .insert(subscription.id.clone(), subscription);
    }
}

#[async_trait]
impl SubscriptionCatalog for StaticCatalog {
    async fn lookup(&self, subscription_id: &str) -> Result<Option<Subscription>, CatalogError> {
        Ok(self.entries.read().await.get(subscription_id).cloned())
    }
}
