use crate::shared::error::{ControlPlaneError, ControlPlaneResult};
use snoozer_providers::NotificationProvider;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Registered notification providers keyed by unique name.
#[derive(Clone, Default)]
pub struct ProviderRepository {
    providers: Arc<RwLock<HashMap<String, Arc<dyn NotificationProvider>>>>,
}

impl ProviderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, provider: Arc<dyn NotificationProvider>) -> ControlPlaneResult<()> {
        let name = provider.name();
        let mut providers = self.providers.write().await;
        if providers.contains_key(&name) {
            return Err(ControlPlaneError::DuplicateProvider(name));
        }
        providers.insert(name, provider);
        Ok(())
    }

    pub async fn get(&self, name: &str) -> ControlPlaneResult<Arc<dyn NotificationProvider>> {
        self.providers
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| ControlPlaneError::ProviderNotFound(name.to_string()))
    }

    /// Copy of the current table, sorted by name, so callers never hold the
    /// lock across provider I/O.
    pub async fn snapshot(&self) -> Vec<(String, Arc<dyn NotificationProvider>)> {
        let providers = self.providers.read().await;
        let mut snapshot: Vec<_> = providers
            .iter()
            .map(|(name, provider)| (name.clone(), provider.clone()))
            .collect();
        snapshot.sort_by(|a, b| a.0.cmp(&b.0));
        snapshot
    }

    pub async fn names(&self) -> Vec<String> {
        self.snapshot()
            .await
            .into_iter()
            .map(|(name, _)| name)
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.providers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
