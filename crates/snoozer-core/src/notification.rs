use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::Instance;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    Idle,
    ScheduledAction,
    ActionExecuted,
    Error,
    StateChange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// A single domain event addressed to every notification provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub severity: Severity,
    pub instance_id: String,
    pub instance_name: String,
    pub provider: String,
    pub region: String,
    pub title: String,
    pub message: String,
    pub data: HashMap<String, serde_json::Value>,
    /// Filled in with the send time when left empty.
    pub timestamp: Option<DateTime<Utc>>,
}

impl Notification {
    pub fn new(
        kind: NotificationType,
        severity: Severity,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            severity,
            instance_id: String::new(),
            instance_name: String::new(),
            provider: String::new(),
            region: String::new(),
            title: title.into(),
            message: message.into(),
            data: HashMap::new(),
            timestamp: None,
        }
    }

    pub fn for_instance(mut self, instance: &Instance) -> Self {
        self.instance_id = instance.instance_id.clone();
        self.instance_name = instance.instance_id.clone();
        self.provider = instance.provider.clone();
        self.region = instance.region.clone();
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Stamps the notification with `now` unless the sender already did.
    pub fn stamp(&mut self, now: DateTime<Utc>) {
        if self.timestamp.is_none() {
            self.timestamp = Some(now);
        }
    }
}
