use async_trait::async_trait;
use snoozer_core::{Notification, Severity};
use std::sync::RwLock;
use tracing::{info, warn};

use crate::{config_str, NotificationProvider, ProviderConfig, ProviderError};

pub const PROVIDER_NAME: &str = "log";

/// Writes notifications into the process log.
pub struct LogProvider {
    // Severity at or above which entries are logged as warnings.
    warn_from: RwLock<Severity>,
}

impl LogProvider {
    pub fn new() -> Self {
        Self {
            warn_from: RwLock::new(Severity::Warning),
        }
    }
}

impl Default for LogProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn severity_rank(severity: Severity) -> u8 {
    match severity {
        Severity::Info => 0,
        Severity::Warning => 1,
        Severity::Error => 2,
    }
}

#[async_trait]
impl NotificationProvider for LogProvider {
    fn name(&self) -> String {
        PROVIDER_NAME.to_string()
    }

    async fn init(&self, config: ProviderConfig) -> Result<(), ProviderError> {
        let Some(level) = config_str(&config, "warn_from") else {
            return Ok(());
        };

        let severity = match level {
            "info" => Severity::Info,
            "warning" => Severity::Warning,
            "error" => Severity::Error,
            other => {
                return Err(ProviderError::Config(format!(
                    "unknown severity '{other}' for warn_from"
                )))
            }
        };

        let mut warn_from = self
            .warn_from
            .write()
            .map_err(|_| ProviderError::Config("log provider lock poisoned".to_string()))?;
        *warn_from = severity;
        Ok(())
    }

    async fn send(&self, notification: &Notification) -> Result<(), ProviderError> {
        let warn_from = *self
            .warn_from
            .read()
            .map_err(|_| ProviderError::Delivery("log provider lock poisoned".to_string()))?;

        let data = serde_json::to_string(&notification.data).unwrap_or_default();
        if severity_rank(notification.severity) >= severity_rank(warn_from) {
            warn!(
                kind = ?notification.kind,
                instance_id = %notification.instance_id,
                provider = %notification.provider,
                region = %notification.region,
                %data,
                "{}: {}",
                notification.title,
                notification.message
            );
        } else {
            info!(
                kind = ?notification.kind,
                instance_id = %notification.instance_id,
                provider = %notification.provider,
                region = %notification.region,
                %data,
                "{}: {}",
                notification.title,
                notification.message
            );
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}
