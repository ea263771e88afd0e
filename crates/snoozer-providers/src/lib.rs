pub mod log_provider;
pub mod webhook_provider;

use async_trait::async_trait;
use snoozer_core::Notification;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use log_provider::LogProvider;
pub use webhook_provider::WebhookProvider;

/// Upper bound for a single `send` unless the provider says otherwise.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

pub type ProviderConfig = HashMap<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Provider not initialized: {0}")]
    NotInitialized(String),
    #[error("Delivery failed: {0}")]
    Delivery(String),
    #[error("Close failed: {0}")]
    Close(String),
    #[error("Provider factory already registered: {0}")]
    Duplicate(String),
}

/// A delivery backend for domain events.
#[async_trait]
pub trait NotificationProvider: Send + Sync {
    fn name(&self) -> String;

    /// Applies configuration; fails on misconfiguration.
    async fn init(&self, config: ProviderConfig) -> Result<(), ProviderError>;

    async fn send(&self, notification: &Notification) -> Result<(), ProviderError>;

    async fn close(&self) -> Result<(), ProviderError>;

    fn send_timeout(&self) -> Duration {
        DEFAULT_SEND_TIMEOUT
    }
}

pub type ProviderFactory = Arc<dyn Fn() -> Arc<dyn NotificationProvider> + Send + Sync>;

/// Named provider factories. Built once at startup and handed to whatever
/// assembles the notification manager.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    factories: HashMap<String, ProviderFactory>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.factories.insert(
            log_provider::PROVIDER_NAME.to_string(),
            Arc::new(|| Arc::new(LogProvider::new()) as Arc<dyn NotificationProvider>),
        );
        registry.factories.insert(
            webhook_provider::PROVIDER_NAME.to_string(),
            Arc::new(|| Arc::new(WebhookProvider::new()) as Arc<dyn NotificationProvider>),
        );
        registry
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: ProviderFactory,
    ) -> Result<(), ProviderError> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(ProviderError::Duplicate(name));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    pub fn create(&self, name: &str) -> Option<Arc<dyn NotificationProvider>> {
        self.factories.get(name).map(|factory| factory())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Reads an optional string entry from a provider configuration.
pub fn config_str<'a>(config: &'a ProviderConfig, key: &str) -> Option<&'a str> {
    config.get(key).and_then(|value| value.as_str())
}

/// Reads an optional positive number of seconds, accepting numbers or numeric strings.
pub fn config_secs(config: &ProviderConfig, key: &str) -> Result<Option<Duration>, ProviderError> {
    let Some(value) = config.get(key) else {
        return Ok(None);
    };

    let secs = match value {
        serde_json::Value::Number(number) => number.as_u64(),
        serde_json::Value::String(text) => text.trim().parse::<u64>().ok(),
        _ => None,
    };

    match secs {
        Some(secs) if secs > 0 => Ok(Some(Duration::from_secs(secs))),
        _ => Err(ProviderError::Config(format!(
            "'{key}' must be a positive number of seconds"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry_contains_log_and_webhook() {
        let registry = ProviderRegistry::with_builtin();
        assert_eq!(registry.names(), vec!["log".to_string(), "webhook".to_string()]);
        assert_eq!(registry.create("log").unwrap().name(), "log");
        assert!(registry.create("email").is_none());
    }

    #[test]
    fn test_empty_registry_creates_nothing() {
        let registry = ProviderRegistry::new();
        assert!(registry.names().is_empty());
        assert!(registry.create("log").is_none());
    }

    #[test]
    fn test_register_rejects_duplicate_names() {
        let mut registry = ProviderRegistry::with_builtin();
        let result = registry.register(
            "log",
            Arc::new(|| Arc::new(LogProvider::new()) as Arc<dyn NotificationProvider>),
        );
        assert_eq!(result, Err(ProviderError::Duplicate("log".to_string())));
    }

    #[test]
    fn test_config_secs_parsing() {
        let config = ProviderConfig::from([
            ("a".to_string(), serde_json::json!(5)),
            ("b".to_string(), serde_json::json!("7")),
            ("c".to_string(), serde_json::json!(0)),
            ("d".to_string(), serde_json::json!(true)),
        ]);
        assert_eq!(config_secs(&config, "a").unwrap(), Some(Duration::from_secs(5)));
        assert_eq!(config_secs(&config, "b").unwrap(), Some(Duration::from_secs(7)));
        assert!(config_secs(&config, "c").is_err());
        assert!(config_secs(&config, "d").is_err());
        assert_eq!(config_secs(&config, "missing").unwrap(), None);
    }
}
