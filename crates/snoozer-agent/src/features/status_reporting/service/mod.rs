use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use snoozer_core::{is_idle, Command, IdleAction, InstanceSpec, InstanceState};
use snoozer_plugins::{CloudProvider, PluginError};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::client::{AgentClient, AgentClientError};
use crate::features::status_reporting::repo::{ResourceSampler, SamplerError};

#[derive(Debug, thiserror::Error)]
pub enum StatusReportServiceError {
    #[error("control plane call failed: {0}")]
    Client(#[from] AgentClientError),
    #[error("provider plugin call failed: {0}")]
    Provider(#[from] PluginError),
    #[error("resource sampling failed: {0}")]
    Sampler(#[from] SamplerError),
}

/// Lifecycle state as this agent sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalStatus {
    pub state: InstanceState,
    pub idle_since: Option<DateTime<Utc>>,
}

impl LocalStatus {
    pub fn running() -> Self {
        Self {
            state: InstanceState::Running,
            idle_since: None,
        }
    }

    fn enter(&mut self, next: InstanceState, now: DateTime<Utc>) {
        if next == InstanceState::Idle {
            if self.state != InstanceState::Idle {
                self.idle_since = Some(now);
            }
        } else {
            self.idle_since = None;
        }
        self.state = next;
    }

    /// Moves between Running and Idle following the latest sample. Other
    /// states are left to the stop walk.
    fn observe(&mut self, idle: bool, now: DateTime<Utc>) {
        match (self.state, idle) {
            (InstanceState::Running, true) => self.enter(InstanceState::Idle, now),
            (InstanceState::Idle, false) => self.enter(InstanceState::Running, now),
            _ => {}
        }
    }

    fn idle_for(&self, now: DateTime<Utc>) -> Option<(DateTime<Utc>, Duration)> {
        let since = self.idle_since.filter(|_| self.state == InstanceState::Idle)?;
        Some((since, (now - since).to_std().unwrap_or_default()))
    }
}

/// Builds the registration for the instance the provider plugin reports.
pub async fn describe_instance(
    provider: &dyn CloudProvider,
    nap_time: Duration,
    thresholds: HashMap<String, f64>,
) -> Result<InstanceSpec, PluginError> {
    let info = provider.get_instance_info().await?;
    Ok(InstanceSpec {
        instance_id: info.id,
        instance_type: info.instance_type,
        region: info.region,
        zone: info.zone,
        provider: provider.kind().as_str().to_string(),
        thresholds,
        nap_time,
    })
}

pub struct StatusReportService {
    spec: InstanceSpec,
    client: Arc<AgentClient>,
    provider: Arc<dyn CloudProvider>,
    sampler: Arc<dyn ResourceSampler>,
    status: Mutex<LocalStatus>,
}

impl StatusReportService {
    pub fn new(
        spec: InstanceSpec,
        client: Arc<AgentClient>,
        provider: Arc<dyn CloudProvider>,
        sampler: Arc<dyn ResourceSampler>,
    ) -> Self {
        Self {
            spec,
            client,
            provider,
            sampler,
            status: Mutex::new(LocalStatus::running()),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.spec.instance_id
    }

    pub async fn status(&self) -> LocalStatus {
        *self.status.lock().await
    }

    pub async fn register(&self) -> Result<String, StatusReportServiceError> {
        let agent_id = self.client.register_instance(self.spec.clone()).await?;
        info!(
            instance_id = %self.spec.instance_id,
            %agent_id,
            provider = %self.spec.provider,
            "Instance registered with control plane"
        );
        Ok(agent_id)
    }

    pub async fn unregister(&self) -> Result<(), StatusReportServiceError> {
        self.client.unregister_instance(&self.spec.instance_id).await?;
        info!(instance_id = %self.spec.instance_id, "Instance unregistered");
        Ok(())
    }

    /// One reporting cycle: sample, heartbeat, run the returned commands and,
    /// while idle, ask the control plane whether to stop.
    pub async fn report_heartbeat(&self) -> Result<LocalStatus, StatusReportServiceError> {
        let usage = self.sampler.sample()?;
        let now = Utc::now();
        let idle = is_idle(&usage, &self.spec.thresholds);

        let state = {
            let mut status = self.status.lock().await;
            status.observe(idle, now);
            status.state
        };

        let commands = self
            .client
            .send_heartbeat(&self.spec.instance_id, state, usage.clone(), now)
            .await?;
        debug!(
            instance_id = %self.spec.instance_id,
            %state,
            commands = commands.len(),
            "Heartbeat sent"
        );

        for command in &commands {
            self.execute(command).await?;
        }

        let idle_for = self.status.lock().await.idle_for(now);
        if let Some((since, duration)) = idle_for {
            let action = self
                .client
                .send_idle_notification(&self.spec.instance_id, since, duration, usage)
                .await?;
            debug!(
                instance_id = %self.spec.instance_id,
                idle_secs = duration.as_secs(),
                %action,
                "Idle decision received"
            );
            if action == IdleAction::Stop {
                self.stop_instance(&format!("idle for {}s", duration.as_secs()))
                    .await?;
            }
        }

        Ok(self.status().await)
    }

    pub async fn execute(&self, command: &Command) -> Result<(), StatusReportServiceError> {
        if command.is_stop() {
            self.stop_instance("stop requested by control plane").await?;
        } else {
            warn!(
                instance_id = %self.spec.instance_id,
                command = %command.command,
                "Ignoring unknown command"
            );
        }
        Ok(())
    }

    /// Walks the lifecycle to Stopping, reporting each step, stops the
    /// instance through the provider plugin and reports Stopped. Returns
    /// false when the instance was already stopping or stopped.
    pub async fn stop_instance(&self, reason: &str) -> Result<bool, StatusReportServiceError> {
        let current = self.status.lock().await.state;
        if matches!(current, InstanceState::Stopping | InstanceState::Stopped) {
            debug!(instance_id = %self.spec.instance_id, %current, "Stop already in progress");
            return Ok(false);
        }

        for next in current.path_to(InstanceState::Stopping) {
            self.advance(next, reason).await?;
        }

        info!(instance_id = %self.spec.instance_id, %reason, "Stopping instance");
        self.provider.stop_instance().await?;
        self.advance(InstanceState::Stopped, "stopped by provider plugin")
            .await?;
        Ok(true)
    }

    async fn advance(
        &self,
        next: InstanceState,
        reason: &str,
    ) -> Result<(), StatusReportServiceError> {
        let previous = self.status.lock().await.state;
        let now = Utc::now();
        self.client
            .report_state_change(&self.spec.instance_id, previous, next, reason, now)
            .await?;
        self.status.lock().await.enter(next, now);
        debug!(instance_id = %self.spec.instance_id, %previous, %next, "State change reported");
        Ok(())
    }
}
