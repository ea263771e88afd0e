pub mod config;
pub mod features;
pub mod http;
pub mod server;
pub mod shared;

use crate::config::ControlPlaneConfig;
use crate::features::instance_registry::controller::InstanceRegistryController;
use crate::features::instance_registry::repo::InMemoryInstanceRepository;
use crate::features::instance_registry::service::InstanceRegistryService;
use crate::features::notifications::controller::NotificationController;
use crate::features::notifications::repo::ProviderRepository;
use crate::features::notifications::service::NotificationService;
use crate::features::observability::controller::ObservabilityController;
use crate::http::OperatorState;
use crate::server::AgentProtocolServer;
use crate::shared::error::{ControlPlaneError, ControlPlaneResult};
use snoozer_proto::v1::agent_service_server::AgentServiceServer;
use snoozer_providers::ProviderRegistry;
use std::sync::Arc;
use tracing::info;

/// Wires the instance store, notification fan-out and metrics together and
/// hands out the two network surfaces built on them.
pub struct ControlPlane {
    registry: Arc<InstanceRegistryService>,
    notifications: Arc<NotificationController>,
    metrics: Arc<ObservabilityController>,
}

impl ControlPlane {
    /// Builds a control plane with no notification providers.
    pub fn new() -> ControlPlaneResult<Self> {
        let metrics = Arc::new(ObservabilityController::new()?);
        let registry = Arc::new(InstanceRegistryService::new(Arc::new(
            InMemoryInstanceRepository::new(),
        )));
        let notifications = Arc::new(NotificationController::new(Arc::new(
            NotificationService::new(ProviderRepository::new()).with_metrics(metrics.clone()),
        )));

        Ok(Self {
            registry,
            notifications,
            metrics,
        })
    }

    /// Builds a control plane and instantiates every configured notifier
    /// from `providers`.
    pub async fn from_config(
        config: &ControlPlaneConfig,
        providers: &ProviderRegistry,
    ) -> ControlPlaneResult<Self> {
        let control_plane = Self::new()?;

        for name in &config.notifiers {
            let provider = providers.create(name).ok_or_else(|| {
                ControlPlaneError::Config(format!(
                    "unknown notifier '{name}', available: {}",
                    providers.names().join(", ")
                ))
            })?;
            control_plane.notifications.register_provider(provider).await?;
            control_plane
                .notifications
                .init_provider(name, config.provider_config(name))
                .await?;
        }

        info!(
            notifiers = ?control_plane.notifications.provider_names().await,
            "Control plane assembled"
        );
        Ok(control_plane)
    }

    pub fn registry(&self) -> &Arc<InstanceRegistryService> {
        &self.registry
    }

    pub fn notifications(&self) -> &Arc<NotificationController> {
        &self.notifications
    }

    pub fn metrics(&self) -> &Arc<ObservabilityController> {
        &self.metrics
    }

    pub fn agent_service(&self) -> AgentServiceServer<AgentProtocolServer> {
        AgentServiceServer::new(AgentProtocolServer::new(
            self.registry.clone(),
            self.notifications.clone(),
            self.metrics.clone(),
        ))
    }

    pub fn router(&self) -> axum::Router {
        http::router(Arc::new(OperatorState {
            registry: Arc::new(InstanceRegistryController::new(self.registry.clone())),
            notifications: self.notifications.clone(),
            metrics: self.metrics.clone(),
        }))
    }

    pub async fn close(&self) -> ControlPlaneResult<()> {
        self.notifications.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_from_config_builds_configured_notifiers() {
        let config = ControlPlaneConfig::default();
        let control_plane = ControlPlane::from_config(&config, &ProviderRegistry::with_builtin())
            .await
            .unwrap();

        assert_eq!(
            control_plane.notifications().provider_names().await,
            vec!["log".to_string()]
        );
        assert!(control_plane.close().await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_notifier_is_config_error() {
        let config = ControlPlaneConfig {
            notifiers: vec!["pager".to_string()],
            ..ControlPlaneConfig::default()
        };
        let result = ControlPlane::from_config(&config, &ProviderRegistry::with_builtin()).await;
        assert!(matches!(result, Err(ControlPlaneError::Config(_))));
    }

    #[tokio::test]
    async fn test_empty_registry_without_notifiers() {
        let config = ControlPlaneConfig {
            notifiers: Vec::new(),
            ..ControlPlaneConfig::default()
        };
        let control_plane = ControlPlane::from_config(&config, &ProviderRegistry::new())
            .await
            .unwrap();
        assert!(control_plane.notifications().provider_names().await.is_empty());
    }

    #[tokio::test]
    async fn test_webhook_without_url_fails_init() {
        let config = ControlPlaneConfig {
            notifiers: vec!["webhook".to_string()],
            ..ControlPlaneConfig::default()
        };
        let result = ControlPlane::from_config(&config, &ProviderRegistry::with_builtin()).await;
        assert!(matches!(
            result,
            Err(ControlPlaneError::Provider { ref provider, .. }) if provider == "webhook"
        ));
    }
}
