use crate::features::instance_registry::repo::InstanceRepository;
use crate::shared::error::{ControlPlaneError, ControlPlaneResult};
use crate::shared::types::{
    Command, HeartbeatOutcome, HeartbeatUpdate, IdleAction, IdleDecision, IdleReport, Instance,
    InstanceSpec, StateChangeOutcome, StateChangeReport,
};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Business rules around the instance store.
pub struct InstanceRegistryService {
    repo: Arc<dyn InstanceRepository>,
}

fn require_id(instance_id: &str) -> ControlPlaneResult<()> {
    if instance_id.trim().is_empty() {
        return Err(ControlPlaneError::ValidationError(
            "instance_id cannot be empty".to_string(),
        ));
    }
    Ok(())
}

impl InstanceRegistryService {
    pub fn new(repo: Arc<dyn InstanceRepository>) -> Self {
        Self { repo }
    }

    /// Registers a new instance and assigns it an agent ID.
    pub async fn register(&self, spec: InstanceSpec) -> ControlPlaneResult<Instance> {
        spec.validate()?;

        let agent_id = format!("agent-{}", Uuid::new_v4());
        let instance = Instance::from_spec(spec, agent_id);
        self.repo.create(instance.clone()).await?;

        info!(
            instance_id = %instance.instance_id,
            agent_id = %instance.agent_id,
            provider = %instance.provider,
            region = %instance.region,
            nap_time_secs = instance.nap_time.as_secs(),
            "Instance registered"
        );
        Ok(instance)
    }

    pub async fn unregister(&self, instance_id: &str) -> ControlPlaneResult<Instance> {
        require_id(instance_id)?;
        let instance = self.repo.delete(instance_id).await?;
        info!(instance_id = %instance_id, "Instance unregistered");
        Ok(instance)
    }

    pub async fn heartbeat(&self, update: HeartbeatUpdate) -> ControlPlaneResult<HeartbeatOutcome> {
        require_id(&update.instance_id)?;
        let outcome = self.repo.update_heartbeat(update).await?;
        debug!(
            instance_id = %outcome.instance.instance_id,
            state = %outcome.instance.state,
            commands = outcome.commands.len(),
            "Heartbeat recorded"
        );
        Ok(outcome)
    }

    /// Records the idle report and applies the stop policy against the
    /// instance's nap time.
    pub async fn record_idle(&self, report: IdleReport) -> ControlPlaneResult<IdleDecision> {
        require_id(&report.instance_id)?;
        let instance = self.repo.record_idle(&report).await?;
        let action = IdleAction::decide(report.idle_duration, instance.nap_time);

        info!(
            instance_id = %instance.instance_id,
            idle_secs = report.idle_duration.as_secs(),
            nap_time_secs = instance.nap_time.as_secs(),
            action = %action,
            "Idle decision"
        );
        Ok(IdleDecision {
            instance,
            idle_duration: report.idle_duration,
            action,
        })
    }

    pub async fn apply_state_change(
        &self,
        report: StateChangeReport,
    ) -> ControlPlaneResult<StateChangeOutcome> {
        require_id(&report.instance_id)?;
        let outcome = self.repo.apply_state_change(&report).await?;
        info!(
            instance_id = %report.instance_id,
            from = %outcome.previous_state,
            to = %outcome.instance.state,
            reason = %report.reason,
            "State change recorded"
        );
        Ok(outcome)
    }

    pub async fn enqueue_command(
        &self,
        instance_id: &str,
        command: Command,
    ) -> ControlPlaneResult<Instance> {
        require_id(instance_id)?;
        let instance = self.repo.enqueue_command(instance_id, command.clone()).await?;
        info!(instance_id = %instance_id, command = %command.command, "Command queued");
        Ok(instance)
    }

    pub async fn get(&self, instance_id: &str) -> ControlPlaneResult<Instance> {
        self.repo.get(instance_id).await
    }

    pub async fn list(&self) -> ControlPlaneResult<Vec<Instance>> {
        self.repo.list().await
    }

    pub async fn count(&self) -> ControlPlaneResult<usize> {
        self.repo.count().await
    }
}
