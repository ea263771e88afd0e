pub mod client;
pub mod config;
pub mod features;

use std::sync::Arc;

use snoozer_plugins::{
    Authenticator, DiscoveryReport, PluginError, PluginManager, PluginManagerConfig,
    TrustManifest,
};
use tracing::{info, warn};

use crate::client::{AgentClient, AgentClientError};
use crate::config::AgentConfig;
use crate::features::status_reporting::controller::StatusReportController;
use crate::features::status_reporting::repo::{LoadAverageSampler, ResourceSampler};
use crate::features::status_reporting::service::{
    describe_instance, StatusReportService, StatusReportServiceError,
};

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("no provider plugin available: {0}")]
    NoProvider(String),
    #[error(transparent)]
    Plugin(#[from] PluginError),
    #[error(transparent)]
    Client(#[from] AgentClientError),
    #[error(transparent)]
    StatusReport(#[from] StatusReportServiceError),
}

/// Picks the configured plugin, or the first ready one.
pub fn select_plugin(
    requested: Option<&str>,
    report: &DiscoveryReport,
) -> Result<String, AgentError> {
    match requested {
        Some(id) if report.ready.iter().any(|ready| ready == id) => Ok(id.to_string()),
        Some(id) => Err(AgentError::NoProvider(format!(
            "plugin '{id}' is not ready (ready: [{}])",
            report.ready.join(", ")
        ))),
        None => report
            .ready
            .first()
            .cloned()
            .ok_or_else(|| AgentError::NoProvider("no plugin reached ready".to_string())),
    }
}

/// A running agent: the plugins it launched, its control plane connection
/// and the reporting loop built on both.
pub struct Agent {
    plugins: PluginManager,
    client: Arc<AgentClient>,
    controller: Arc<StatusReportController>,
    plugin_id: String,
}

impl Agent {
    pub async fn start(config: &AgentConfig) -> Result<Self, AgentError> {
        Self::start_with_sampler(config, Arc::new(LoadAverageSampler::new())).await
    }

    /// Launches the provider plugins, describes this instance through the
    /// selected one, connects and registers.
    pub async fn start_with_sampler(
        config: &AgentConfig,
        sampler: Arc<dyn ResourceSampler>,
    ) -> Result<Self, AgentError> {
        let authenticator = if config.plugin_auth {
            Authenticator::enabled(TrustManifest::load(&config.trust_manifest)?)
        } else {
            warn!("Plugin authentication is disabled");
            Authenticator::disabled()
        };

        let plugins = PluginManager::new(
            PluginManagerConfig {
                plugins_dir: config.plugins_dir.clone(),
                handshake_timeout: config.handshake_timeout,
                rpc_timeout: config.rpc_timeout,
                ..PluginManagerConfig::default()
            },
            authenticator,
        );

        let report = plugins.discover_and_initialize().await?;
        for (plugin, reason) in &report.failed {
            warn!(%plugin, %reason, "Provider plugin excluded");
        }

        match Self::attach(config, plugins.clone(), &report, sampler).await {
            Ok(agent) => Ok(agent),
            Err(error) => {
                plugins.shutdown_all().await;
                Err(error)
            }
        }
    }

    async fn attach(
        config: &AgentConfig,
        plugins: PluginManager,
        report: &DiscoveryReport,
        sampler: Arc<dyn ResourceSampler>,
    ) -> Result<Self, AgentError> {
        let plugin_id = select_plugin(config.provider.as_deref(), report)?;
        let provider = plugins.provider(&plugin_id).await?;
        let spec = describe_instance(&provider, config.nap_time, config.thresholds.clone()).await?;
        info!(
            %plugin_id,
            instance_id = %spec.instance_id,
            provider = %spec.provider,
            "Provider plugin selected"
        );

        let client = Arc::new(AgentClient::new(
            config.control_plane_addr.clone(),
            config.rpc_timeout,
        ));
        client.connect().await?;

        let service = Arc::new(StatusReportService::new(
            spec,
            client.clone(),
            Arc::new(provider),
            sampler,
        ));
        let controller = Arc::new(StatusReportController::new(
            service,
            config.heartbeat_interval,
        ));
        if let Err(error) = controller.register().await {
            client.disconnect().await;
            return Err(error.into());
        }

        Ok(Self {
            plugins,
            client,
            controller,
            plugin_id,
        })
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub fn plugins(&self) -> &PluginManager {
        &self.plugins
    }

    pub fn controller(&self) -> &Arc<StatusReportController> {
        &self.controller
    }

    /// Unregisters, disconnects and shuts every plugin down. Each step runs
    /// even if an earlier one failed.
    pub async fn shutdown(&self) {
        if let Err(error) = self.controller.unregister().await {
            warn!(error = %error, "Failed to unregister instance");
        }
        self.client.disconnect().await;
        self.plugins.shutdown_all().await;
        info!("Agent shut down");
    }
}
