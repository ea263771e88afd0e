use crate::features::observability::repo::ObservabilityRepository;
use crate::shared::error::{ControlPlaneError, ControlPlaneResult};
use snoozer_core::IdleAction;

/// Metrics for one control plane. Each instance owns its own registry, so
/// tests can build as many as they like.
pub struct ObservabilityController {
    repo: ObservabilityRepository,
}

impl ObservabilityController {
    pub fn new() -> ControlPlaneResult<Self> {
        let repo = ObservabilityRepository::new().map_err(ControlPlaneError::Config)?;
        Ok(Self { repo })
    }

    pub fn record_api_request(&self, endpoint: &str, status: &str, seconds: f64) {
        self.repo.observe_api_request(endpoint, status, seconds);
    }

    pub fn set_active_instances(&self, count: usize) {
        self.repo.set_active_instance_count(count as f64);
    }

    pub fn record_heartbeat(&self) {
        self.repo.inc_heartbeat_total();
    }

    pub fn record_idle_decision(&self, action: IdleAction) {
        self.repo.inc_idle_decision(action.as_str());
    }

    pub fn record_notification_failure(&self, provider: &str) {
        self.repo.inc_notification_failure(provider);
    }

    pub fn render_metrics(&self) -> Result<String, String> {
        self.repo.render_metrics()
    }
}
