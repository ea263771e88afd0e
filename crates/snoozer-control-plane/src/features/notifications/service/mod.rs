use crate::features::notifications::repo::ProviderRepository;
use crate::features::observability::controller::ObservabilityController;
use crate::shared::error::{ControlPlaneError, ControlPlaneResult};
use crate::shared::types::Notification;
use chrono::Utc;
use snoozer_providers::{NotificationProvider, ProviderConfig, ProviderError};
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One provider's failure to deliver a notification.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryFailure {
    pub provider: String,
    pub error: ProviderError,
}

impl fmt::Display for DeliveryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.provider, self.error)
    }
}

/// Fans notifications out to every registered provider.
pub struct NotificationService {
    repo: ProviderRepository,
    metrics: Option<Arc<ObservabilityController>>,
}

impl NotificationService {
    pub fn new(repo: ProviderRepository) -> Self {
        Self {
            repo,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<ObservabilityController>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub async fn register_provider(
        &self,
        provider: Arc<dyn NotificationProvider>,
    ) -> ControlPlaneResult<()> {
        let name = provider.name();
        self.repo.insert(provider).await?;
        info!(provider = %name, "Notification provider registered");
        Ok(())
    }

    pub async fn init_provider(&self, name: &str, config: ProviderConfig) -> ControlPlaneResult<()> {
        let provider = self.repo.get(name).await?;
        provider
            .init(config)
            .await
            .map_err(|source| ControlPlaneError::Provider {
                provider: name.to_string(),
                source,
            })?;
        info!(provider = %name, "Notification provider initialized");
        Ok(())
    }

    pub async fn provider_names(&self) -> Vec<String> {
        self.repo.names().await
    }

    /// Delivers `notification` to every provider concurrently and returns the
    /// failures; an empty list means every provider accepted it.
    ///
    /// Each delivery runs on its own task bounded by that provider's send
    /// timeout. Dropping the returned future does not cancel deliveries that
    /// are already in flight.
    pub async fn send(&self, mut notification: Notification) -> Vec<DeliveryFailure> {
        notification.stamp(Utc::now());
        let notification = Arc::new(notification);

        let deliveries: Vec<(String, JoinHandle<Result<(), ProviderError>>)> = self
            .repo
            .snapshot()
            .await
            .into_iter()
            .map(|(name, provider)| {
                let notification = notification.clone();
                let handle = tokio::spawn(async move {
                    let limit = provider.send_timeout();
                    match tokio::time::timeout(limit, provider.send(&notification)).await {
                        Ok(result) => result,
                        Err(_) => Err(ProviderError::Delivery(format!(
                            "timed out after {limit:?}"
                        ))),
                    }
                });
                (name, handle)
            })
            .collect();

        let mut failures = Vec::new();
        for (provider, handle) in deliveries {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(ProviderError::Delivery(format!("delivery task failed: {e}"))),
            };

            if let Err(error) = result {
                warn!(
                    provider = %provider,
                    kind = ?notification.kind,
                    instance_id = %notification.instance_id,
                    error = %error,
                    "Notification delivery failed"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_notification_failure(&provider);
                }
                failures.push(DeliveryFailure { provider, error });
            }
        }

        debug!(
            kind = ?notification.kind,
            instance_id = %notification.instance_id,
            failures = failures.len(),
            "Notification dispatched"
        );
        failures
    }

    /// Closes every provider. Keeps going past failures and reports the last
    /// one encountered.
    pub async fn close(&self) -> ControlPlaneResult<()> {
        let mut last_error = None;
        for (name, provider) in self.repo.snapshot().await {
            match provider.close().await {
                Ok(()) => debug!(provider = %name, "Notification provider closed"),
                Err(source) => {
                    warn!(provider = %name, error = %source, "Failed to close notification provider");
                    last_error = Some(ControlPlaneError::Provider {
                        provider: name,
                        source,
                    });
                }
            }
        }

        match last_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::types::{NotificationType, Severity};
    use async_trait::async_trait;
    use mockall::mock;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    mock! {
        pub Provider {}

        #[async_trait]
        impl NotificationProvider for Provider {
            fn name(&self) -> String;
            async fn init(&self, config: ProviderConfig) -> Result<(), ProviderError>;
            async fn send(&self, notification: &Notification) -> Result<(), ProviderError>;
            async fn close(&self) -> Result<(), ProviderError>;
            fn send_timeout(&self) -> Duration;
        }
    }

    /// Counts deliveries, optionally failing or stalling each one.
    struct CountingProvider {
        name: String,
        sent: Arc<AtomicUsize>,
        fail: bool,
        delay: Duration,
    }

    impl CountingProvider {
        fn new(name: &str, sent: Arc<AtomicUsize>) -> Self {
            Self {
                name: name.to_string(),
                sent,
                fail: false,
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl NotificationProvider for CountingProvider {
        fn name(&self) -> String {
            self.name.clone()
        }

        async fn init(&self, _config: ProviderConfig) -> Result<(), ProviderError> {
            Ok(())
        }

        async fn send(&self, _notification: &Notification) -> Result<(), ProviderError> {
            tokio::time::sleep(self.delay).await;
            self.sent.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ProviderError::Delivery("always fails".to_string()));
            }
            Ok(())
        }

        async fn close(&self) -> Result<(), ProviderError> {
            Ok(())
        }

        fn send_timeout(&self) -> Duration {
            Duration::from_secs(5)
        }
    }

    fn create_test_service() -> NotificationService {
        NotificationService::new(ProviderRepository::new())
    }

    fn notification() -> Notification {
        Notification::new(NotificationType::Idle, Severity::Info, "Instance idle", "idle")
    }

    #[tokio::test]
    async fn test_one_failing_provider_does_not_block_the_rest() {
        let service = create_test_service();
        let sent = Arc::new(AtomicUsize::new(0));
        for name in ["a", "b", "c"] {
            service
                .register_provider(Arc::new(CountingProvider::new(name, sent.clone())))
                .await
                .unwrap();
        }
        let mut broken = CountingProvider::new("broken", sent.clone());
        broken.fail = true;
        service.register_provider(Arc::new(broken)).await.unwrap();

        let failures = service.send(notification()).await;

        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].provider, "broken");
        assert_eq!(sent.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_no_providers_is_success() {
        let service = create_test_service();
        assert!(service.send(notification()).await.is_empty());
    }

    #[tokio::test]
    async fn test_timestamp_is_filled_only_when_unset() {
        let service = create_test_service();
        let fixed = chrono::DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);

        let mut provider = MockProvider::new();
        provider.expect_name().return_const("mock".to_string());
        provider
            .expect_send_timeout()
            .return_const(Duration::from_secs(1));
        provider
            .expect_send()
            .withf(move |n| n.timestamp == Some(fixed))
            .times(1)
            .returning(|_| Ok(()));
        provider
            .expect_send()
            .withf(move |n| n.timestamp.is_some_and(|t| t > fixed))
            .times(1)
            .returning(|_| Ok(()));
        service.register_provider(Arc::new(provider)).await.unwrap();

        assert!(service
            .send(notification().with_timestamp(fixed))
            .await
            .is_empty());
        assert!(service.send(notification()).await.is_empty());
    }

    #[tokio::test]
    async fn test_slow_provider_times_out_as_failure() {
        let service = create_test_service();
        let sent = Arc::new(AtomicUsize::new(0));
        service
            .register_provider(Arc::new(CountingProvider::new("fast", sent.clone())))
            .await
            .unwrap();

        let mut stalled = CountingProvider::new("stalled", sent.clone());
        stalled.delay = Duration::from_secs(30);
        service
            .register_provider(Arc::new(StalledProvider(stalled)))
            .await
            .unwrap();

        let failures = service.send(notification()).await;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].provider, "stalled");
        assert!(failures[0].error.to_string().contains("timed out"));
        assert_eq!(sent.load(Ordering::SeqCst), 1);
    }

    /// Wraps a provider with a very short send timeout.
    struct StalledProvider(CountingProvider);

    #[async_trait]
    impl NotificationProvider for StalledProvider {
        fn name(&self) -> String {
            self.0.name()
        }

        async fn init(&self, config: ProviderConfig) -> Result<(), ProviderError> {
            self.0.init(config).await
        }

        async fn send(&self, notification: &Notification) -> Result<(), ProviderError> {
            self.0.send(notification).await
        }

        async fn close(&self) -> Result<(), ProviderError> {
            self.0.close().await
        }

        fn send_timeout(&self) -> Duration {
            Duration::from_millis(50)
        }
    }

    #[tokio::test]
    async fn test_caller_cancellation_does_not_abort_deliveries() {
        let service = create_test_service();
        let sent = Arc::new(AtomicUsize::new(0));
        let mut slow = CountingProvider::new("slow", sent.clone());
        slow.delay = Duration::from_millis(200);
        service.register_provider(Arc::new(slow)).await.unwrap();

        let abandoned =
            tokio::time::timeout(Duration::from_millis(20), service.send(notification())).await;
        assert!(abandoned.is_err());
        assert_eq!(sent.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_init_unknown_and_failing_provider() {
        let service = create_test_service();
        assert!(matches!(
            service.init_provider("ghost", ProviderConfig::new()).await,
            Err(ControlPlaneError::ProviderNotFound(_))
        ));

        let mut provider = MockProvider::new();
        provider.expect_name().return_const("strict".to_string());
        provider
            .expect_init()
            .returning(|_| Err(ProviderError::Config("missing token".to_string())));
        service.register_provider(Arc::new(provider)).await.unwrap();

        let result = service.init_provider("strict", ProviderConfig::new()).await;
        assert!(matches!(
            result,
            Err(ControlPlaneError::Provider { ref provider, .. }) if provider == "strict"
        ));
    }

    #[tokio::test]
    async fn test_close_continues_and_reports_last_error() {
        let service = create_test_service();
        for (name, fails) in [("a", true), ("b", false), ("c", true)] {
            let mut provider = MockProvider::new();
            provider.expect_name().return_const(name.to_string());
            provider.expect_close().times(1).returning(move || {
                if fails {
                    Err(ProviderError::Close(format!("{name} stuck")))
                } else {
                    Ok(())
                }
            });
            service.register_provider(Arc::new(provider)).await.unwrap();
        }

        let result = service.close().await;
        assert!(matches!(
            result,
            Err(ControlPlaneError::Provider { ref provider, .. }) if provider == "c"
        ));
    }
}
