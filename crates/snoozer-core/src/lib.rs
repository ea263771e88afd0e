pub mod lifecycle;
pub mod notification;
pub mod policy;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

pub use lifecycle::InstanceState;
pub use notification::{Notification, NotificationType, Severity};
pub use policy::{is_idle, IdleAction};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition {
        from: InstanceState,
        to: InstanceState,
    },
    #[error("Unknown instance state: {0}")]
    UnknownState(String),
    #[error("Unknown idle action: {0}")]
    UnknownAction(String),
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(i64),
}

pub type Result<T> = std::result::Result<T, CoreError>;

/// Everything an instance declares about itself when it registers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceSpec {
    pub instance_id: String,
    pub instance_type: String,
    pub region: String,
    pub zone: String,
    pub provider: String,
    pub thresholds: HashMap<String, f64>,
    #[serde(with = "duration_secs")]
    pub nap_time: Duration,
}

impl InstanceSpec {
    /// ID, provider and region are mandatory, and a zero nap time would stop
    /// an instance the moment it reports idle.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("instance_id", &self.instance_id),
            ("provider", &self.provider),
            ("region", &self.region),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(CoreError::Validation(format!("{field} cannot be empty")));
            }
        }

        if self.nap_time.is_zero() {
            return Err(CoreError::Validation(
                "nap_time must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

/// Authoritative record for a registered instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub instance_id: String,
    pub agent_id: String,
    pub instance_type: String,
    pub region: String,
    pub zone: String,
    pub provider: String,
    pub state: InstanceState,
    pub thresholds: HashMap<String, f64>,
    #[serde(with = "duration_secs")]
    pub nap_time: Duration,
    pub last_heartbeat: DateTime<Utc>,
    pub idle_since: Option<DateTime<Utc>>,
    pub registered_at: DateTime<Utc>,
    pub resource_usage: HashMap<String, f64>,
}

impl Instance {
    pub fn from_spec(spec: InstanceSpec, agent_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            instance_id: spec.instance_id,
            agent_id: agent_id.into(),
            instance_type: spec.instance_type,
            region: spec.region,
            zone: spec.zone,
            provider: spec.provider,
            state: InstanceState::Running,
            thresholds: spec.thresholds,
            nap_time: spec.nap_time,
            last_heartbeat: now,
            idle_since: None,
            registered_at: now,
            resource_usage: HashMap::new(),
        }
    }
}

/// Opaque directive handed to an instance with its next heartbeat response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub command: String,
}

impl Command {
    pub const STOP: &'static str = "stop";

    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    pub fn stop() -> Self {
        Self::new(Self::STOP)
    }

    pub fn is_stop(&self) -> bool {
        self.command == Self::STOP
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error_code: String,
    pub message: String,
    pub details: Option<HashMap<String, String>>,
    pub timestamp: DateTime<Utc>,
}

impl ErrorResponse {
    pub fn new(error_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_code: error_code.into(),
            message: message.into(),
            details: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_details(mut self, details: HashMap<String, String>) -> Self {
        self.details = Some(details);
        self
    }
}

/// Serializes a `Duration` as whole seconds.
pub mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
