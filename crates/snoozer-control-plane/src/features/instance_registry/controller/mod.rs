use crate::features::instance_registry::service::InstanceRegistryService;
use crate::shared::types::{Command, Instance};
use snoozer_core::ErrorResponse;
use std::sync::Arc;
use tracing::info;

/// Operator-facing entry points into the instance registry.
pub struct InstanceRegistryController {
    service: Arc<InstanceRegistryService>,
}

impl InstanceRegistryController {
    pub fn new(service: Arc<InstanceRegistryService>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &Arc<InstanceRegistryService> {
        &self.service
    }

    pub async fn list_instances(&self) -> Result<Vec<Instance>, ErrorResponse> {
        self.service.list().await.map_err(Into::into)
    }

    pub async fn get_instance(&self, instance_id: &str) -> Result<Instance, ErrorResponse> {
        self.service.get(instance_id).await.map_err(Into::into)
    }

    /// Queues a stop command; the instance picks it up on its next heartbeat.
    pub async fn request_stop(&self, instance_id: &str) -> Result<Instance, ErrorResponse> {
        info!(instance_id = %instance_id, "Received stop request");
        self.service
            .enqueue_command(instance_id, Command::stop())
            .await
            .map_err(Into::into)
    }
}
