pub use snoozer_core::{
    Command, IdleAction, Instance, InstanceSpec, InstanceState, Notification, NotificationType,
    Severity,
};

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use crate::shared::error::{ControlPlaneError, ControlPlaneResult};

/// Heartbeat as reported by an instance.
#[derive(Debug, Clone)]
pub struct HeartbeatUpdate {
    pub instance_id: String,
    pub state: InstanceState,
    pub resource_usage: HashMap<String, f64>,
    pub received_at: DateTime<Utc>,
}

/// Result of applying a heartbeat to the store.
#[derive(Debug, Clone)]
pub struct HeartbeatOutcome {
    pub previous_state: InstanceState,
    /// Record after the update.
    pub instance: Instance,
    /// Commands drained from the queue; each is handed out exactly once.
    pub commands: Vec<Command>,
}

impl HeartbeatOutcome {
    pub fn state_changed(&self) -> bool {
        self.previous_state != self.instance.state
    }
}

#[derive(Debug, Clone)]
pub struct IdleReport {
    pub instance_id: String,
    pub idle_since: DateTime<Utc>,
    pub idle_duration: Duration,
    pub resource_usage: HashMap<String, f64>,
}

#[derive(Debug, Clone)]
pub struct IdleDecision {
    pub instance: Instance,
    pub idle_duration: Duration,
    pub action: IdleAction,
}

#[derive(Debug, Clone)]
pub struct StateChangeReport {
    pub instance_id: String,
    pub previous_state: InstanceState,
    pub current_state: InstanceState,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct StateChangeOutcome {
    /// State stored before the change was applied.
    pub previous_state: InstanceState,
    pub instance: Instance,
}

/// Point in time by which the caller expects an answer. Carried from the
/// inbound RPC into every store call it triggers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    pub fn none() -> Self {
        Self(None)
    }

    pub fn after(timeout: Duration) -> Self {
        Self(Some(Instant::now() + timeout))
    }

    pub fn instant(&self) -> Option<Instant> {
        self.0
    }

    pub fn is_expired(&self) -> bool {
        self.0.is_some_and(|at| Instant::now() >= at)
    }

    /// Runs `operation`, failing with [`ControlPlaneError::Timeout`] once the
    /// deadline passes.
    pub async fn run<T, F>(&self, operation: F) -> ControlPlaneResult<T>
    where
        F: Future<Output = ControlPlaneResult<T>>,
    {
        match self.0 {
            None => operation.await,
            Some(at) if Instant::now() >= at => Err(ControlPlaneError::Timeout(
                "caller deadline passed before the call started".to_string(),
            )),
            Some(at) => tokio::time::timeout_at(at, operation)
                .await
                .map_err(|_| ControlPlaneError::Timeout("caller deadline passed".to_string()))?,
        }
    }
}
