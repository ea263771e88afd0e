use crate::features::notifications::service::{DeliveryFailure, NotificationService};
use crate::shared::error::ControlPlaneResult;
use crate::shared::types::{
    IdleAction, Instance, InstanceState, Notification, NotificationType, Severity,
};
use snoozer_providers::{NotificationProvider, ProviderConfig};
use std::sync::Arc;
use std::time::Duration;

pub fn idle_notification(
    instance: &Instance,
    idle_duration: Duration,
    action: IdleAction,
) -> Notification {
    let severity = match action {
        IdleAction::Stop => Severity::Warning,
        IdleAction::Continue => Severity::Info,
    };
    Notification::new(
        NotificationType::Idle,
        severity,
        format!("Instance {} is idle", instance.instance_id),
        format!(
            "Idle for {}s against a nap time of {}s, action: {}",
            idle_duration.as_secs(),
            instance.nap_time.as_secs(),
            action
        ),
    )
    .for_instance(instance)
    .with_data("action", action.as_str())
    .with_data("idle_seconds", idle_duration.as_secs())
    .with_data("nap_time_seconds", instance.nap_time.as_secs())
}

pub fn scheduled_action_notification(
    instance: &Instance,
    action: &str,
    reason: &str,
) -> Notification {
    Notification::new(
        NotificationType::ScheduledAction,
        Severity::Info,
        format!("Action '{action}' scheduled for {}", instance.instance_id),
        reason.to_string(),
    )
    .for_instance(instance)
    .with_data("action", action)
    .with_data("reason", reason)
}

pub fn action_executed_notification(instance: &Instance, action: &str) -> Notification {
    Notification::new(
        NotificationType::ActionExecuted,
        Severity::Info,
        format!("Action '{action}' executed on {}", instance.instance_id),
        format!("{} completed '{action}'", instance.instance_id),
    )
    .for_instance(instance)
    .with_data("action", action)
}

pub fn error_notification(instance: &Instance, error: &str) -> Notification {
    Notification::new(
        NotificationType::Error,
        Severity::Error,
        format!("Error on {}", instance.instance_id),
        error.to_string(),
    )
    .for_instance(instance)
    .with_data("error", error)
}

pub fn state_change_notification(
    instance: &Instance,
    previous: InstanceState,
    current: InstanceState,
    reason: &str,
) -> Notification {
    Notification::new(
        NotificationType::StateChange,
        Severity::Info,
        format!("{} is now {current}", instance.instance_id),
        format!("{previous} -> {current}: {reason}"),
    )
    .for_instance(instance)
    .with_data("previous_state", previous.as_str())
    .with_data("current_state", current.as_str())
    .with_data("reason", reason)
}

/// Domain-level entry points for sending notifications.
pub struct NotificationController {
    service: Arc<NotificationService>,
}

impl NotificationController {
    pub fn new(service: Arc<NotificationService>) -> Self {
        Self { service }
    }

    pub async fn register_provider(
        &self,
        provider: Arc<dyn NotificationProvider>,
    ) -> ControlPlaneResult<()> {
        self.service.register_provider(provider).await
    }

    pub async fn init_provider(&self, name: &str, config: ProviderConfig) -> ControlPlaneResult<()> {
        self.service.init_provider(name, config).await
    }

    pub async fn provider_names(&self) -> Vec<String> {
        self.service.provider_names().await
    }

    pub async fn send(&self, notification: Notification) -> Vec<DeliveryFailure> {
        self.service.send(notification).await
    }

    pub async fn notify_idle(
        &self,
        instance: &Instance,
        idle_duration: Duration,
        action: IdleAction,
    ) -> Vec<DeliveryFailure> {
        self.send(idle_notification(instance, idle_duration, action))
            .await
    }

    pub async fn notify_scheduled_action(
        &self,
        instance: &Instance,
        action: &str,
        reason: &str,
    ) -> Vec<DeliveryFailure> {
        self.send(scheduled_action_notification(instance, action, reason))
            .await
    }

    pub async fn notify_action_executed(
        &self,
        instance: &Instance,
        action: &str,
    ) -> Vec<DeliveryFailure> {
        self.send(action_executed_notification(instance, action))
            .await
    }

    pub async fn notify_error(&self, instance: &Instance, error: &str) -> Vec<DeliveryFailure> {
        self.send(error_notification(instance, error)).await
    }

    pub async fn notify_state_change(
        &self,
        instance: &Instance,
        previous: InstanceState,
        current: InstanceState,
        reason: &str,
    ) -> Vec<DeliveryFailure> {
        self.send(state_change_notification(instance, previous, current, reason))
            .await
    }

    pub async fn close(&self) -> ControlPlaneResult<()> {
        self.service.close().await
    }
}
