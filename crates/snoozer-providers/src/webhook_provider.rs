use async_trait::async_trait;
use snoozer_core::Notification;
use std::sync::RwLock;
use std::time::Duration;
use tracing::debug;

use crate::{
    config_secs, config_str, NotificationProvider, ProviderConfig, ProviderError,
    DEFAULT_SEND_TIMEOUT,
};

pub const PROVIDER_NAME: &str = "webhook";

#[derive(Debug, Clone)]
struct WebhookSettings {
    url: String,
    timeout: Duration,
}

/// POSTs each notification as JSON to a configured URL.
pub struct WebhookProvider {
    client: reqwest::Client,
    settings: RwLock<Option<WebhookSettings>>,
}

impl WebhookProvider {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            settings: RwLock::new(None),
        }
    }

    fn settings(&self) -> Result<Option<WebhookSettings>, ProviderError> {
        self.settings
            .read()
            .map(|settings| settings.clone())
            .map_err(|_| ProviderError::Delivery("webhook settings lock poisoned".to_string()))
    }
}

impl Default for WebhookProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationProvider for WebhookProvider {
    fn name(&self) -> String {
        PROVIDER_NAME.to_string()
    }

    async fn init(&self, config: ProviderConfig) -> Result<(), ProviderError> {
        let url = config_str(&config, "url")
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| ProviderError::Config("'url' is required".to_string()))?;

        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ProviderError::Config(format!(
                "'url' must be an http(s) URL, got '{url}'"
            )));
        }

        let timeout = config_secs(&config, "timeout_secs")?.unwrap_or(DEFAULT_SEND_TIMEOUT);

        let mut settings = self
            .settings
            .write()
            .map_err(|_| ProviderError::Config("webhook settings lock poisoned".to_string()))?;
        *settings = Some(WebhookSettings {
            url: url.to_string(),
            timeout,
        });
        Ok(())
    }

    async fn send(&self, notification: &Notification) -> Result<(), ProviderError> {
        let settings = self
            .settings()?
            .ok_or_else(|| ProviderError::NotInitialized(PROVIDER_NAME.to_string()))?;

        let response = self
            .client
            .post(&settings.url)
            .timeout(settings.timeout)
            .json(notification)
            .send()
            .await
            .map_err(|e| ProviderError::Delivery(e.to_string()))?;

        response
            .error_for_status()
            .map_err(|e| ProviderError::Delivery(e.to_string()))?;

        debug!(url = %settings.url, instance_id = %notification.instance_id, "Webhook delivered");
        Ok(())
    }

    async fn close(&self) -> Result<(), ProviderError> {
        let mut settings = self
            .settings
            .write()
            .map_err(|_| ProviderError::Close("webhook settings lock poisoned".to_string()))?;
        *settings = None;
        Ok(())
    }

    fn send_timeout(&self) -> Duration {
        self.settings()
            .ok()
            .flatten()
            .map(|settings| settings.timeout)
            .unwrap_or(DEFAULT_SEND_TIMEOUT)
    }
}
