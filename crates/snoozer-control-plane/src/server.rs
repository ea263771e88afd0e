use crate::features::instance_registry::service::InstanceRegistryService;
use crate::features::notifications::controller::{
    idle_notification, state_change_notification, NotificationController,
};
use crate::features::observability::controller::ObservabilityController;
use crate::shared::error::ControlPlaneError;
use crate::shared::types::{
    Deadline, HeartbeatUpdate, IdleReport, InstanceSpec, Notification, StateChangeReport,
};
use chrono::Utc;
use snoozer_proto::v1::agent_service_server::AgentService;
use snoozer_proto::v1::{
    HeartbeatRequest, HeartbeatResponse, IdleNotificationRequest, IdleNotificationResponse,
    RegisterInstanceRequest, RegisterInstanceResponse, StateChangeRequest, StateChangeResponse,
    UnregisterInstanceRequest, UnregisterInstanceResponse,
};
use snoozer_proto::{from_epoch_secs, secs_to_duration, state_from_wire};
use std::sync::Arc;
use std::time::Duration;
use tonic::{Request, Response, Status};
use tracing::{debug, warn};

const GRPC_TIMEOUT_HEADER: &str = "grpc-timeout";

/// Parses a `grpc-timeout` header value: at most eight digits followed by a
/// unit of `H`, `M`, `S`, `m`, `u` or `n`.
pub fn parse_grpc_timeout(value: &str) -> Option<Duration> {
    if !value.is_ascii() || value.len() < 2 {
        return None;
    }
    let (digits, unit) = value.split_at(value.len() - 1);
    if digits.len() > 8 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let amount: u64 = digits.parse().ok()?;

    match unit {
        "H" => Some(Duration::from_secs(amount * 3600)),
        "M" => Some(Duration::from_secs(amount * 60)),
        "S" => Some(Duration::from_secs(amount)),
        "m" => Some(Duration::from_millis(amount)),
        "u" => Some(Duration::from_micros(amount)),
        "n" => Some(Duration::from_nanos(amount)),
        _ => None,
    }
}

fn deadline_of<T>(request: &Request<T>) -> Deadline {
    request
        .metadata()
        .get(GRPC_TIMEOUT_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_grpc_timeout)
        .map(Deadline::after)
        .unwrap_or_default()
}

/// Business failures travel back in the response body; anything else fails
/// the call.
fn business_message(error: ControlPlaneError) -> Result<String, Status> {
    if error.is_business() {
        Ok(error.to_string())
    } else {
        Err(error.into())
    }
}

fn invalid_argument(error: impl std::fmt::Display) -> Status {
    Status::invalid_argument(error.to_string())
}

/// Agent-facing gRPC surface of the control plane.
pub struct AgentProtocolServer {
    registry: Arc<InstanceRegistryService>,
    notifications: Arc<NotificationController>,
    metrics: Arc<ObservabilityController>,
}

impl AgentProtocolServer {
    pub fn new(
        registry: Arc<InstanceRegistryService>,
        notifications: Arc<NotificationController>,
        metrics: Arc<ObservabilityController>,
    ) -> Self {
        Self {
            registry,
            notifications,
            metrics,
        }
    }

    async fn refresh_instance_gauge(&self) {
        match self.registry.count().await {
            Ok(count) => self.metrics.set_active_instances(count),
            Err(error) => warn!(error = %error, "Failed to count instances"),
        }
    }

    /// Fans `notification` out on its own task. Waits for it until the
    /// caller's deadline; past that the response goes out and delivery
    /// carries on detached.
    async fn dispatch(&self, notification: Notification, deadline: Deadline) {
        let notifications = self.notifications.clone();
        let delivery = tokio::spawn(async move { notifications.send(notification).await });

        let joined = match deadline.instant() {
            Some(at) => match tokio::time::timeout_at(at, delivery).await {
                Ok(joined) => joined,
                Err(_) => {
                    debug!("Caller deadline passed, notification delivery continues detached");
                    return;
                }
            },
            None => delivery.await,
        };

        if let Err(error) = joined {
            warn!(error = %error, "Notification task failed");
        }
    }
}

#[tonic::async_trait]
impl AgentService for AgentProtocolServer {
    async fn register_instance(
        &self,
        request: Request<RegisterInstanceRequest>,
    ) -> Result<Response<RegisterInstanceResponse>, Status> {
        let deadline = deadline_of(&request);
        let req = request.into_inner();

        let spec = match InstanceSpec::try_from(req) {
            Ok(spec) => spec,
            Err(error) => {
                return Ok(Response::new(RegisterInstanceResponse {
                    success: false,
                    agent_id: String::new(),
                    error: ControlPlaneError::from(error).to_string(),
                }))
            }
        };

        let response = match deadline.run(self.registry.register(spec)).await {
            Ok(instance) => {
                self.refresh_instance_gauge().await;
                RegisterInstanceResponse {
                    success: true,
                    agent_id: instance.agent_id,
                    error: String::new(),
                }
            }
            Err(error) => RegisterInstanceResponse {
                success: false,
                agent_id: String::new(),
                error: business_message(error)?,
            },
        };

        Ok(Response::new(response))
    }

    async fn unregister_instance(
        &self,
        request: Request<UnregisterInstanceRequest>,
    ) -> Result<Response<UnregisterInstanceResponse>, Status> {
        let deadline = deadline_of(&request);
        let req = request.into_inner();

        let response = match deadline.run(self.registry.unregister(&req.instance_id)).await {
            Ok(_) => {
                self.refresh_instance_gauge().await;
                UnregisterInstanceResponse {
                    success: true,
                    error: String::new(),
                }
            }
            Err(error) => UnregisterInstanceResponse {
                success: false,
                error: business_message(error)?,
            },
        };

        Ok(Response::new(response))
    }

    async fn send_heartbeat(
        &self,
        request: Request<HeartbeatRequest>,
    ) -> Result<Response<HeartbeatResponse>, Status> {
        let deadline = deadline_of(&request);
        let req = request.into_inner();

        let state = state_from_wire(req.state).map_err(invalid_argument)?;
        let received_at = if req.timestamp > 0 {
            from_epoch_secs(req.timestamp).map_err(invalid_argument)?
        } else {
            Utc::now()
        };

        let outcome = deadline
            .run(self.registry.heartbeat(HeartbeatUpdate {
                instance_id: req.instance_id,
                state,
                resource_usage: req.resource_usage,
                received_at,
            }))
            .await?;
        self.metrics.record_heartbeat();

        if outcome.state_changed() {
            let notification = state_change_notification(
                &outcome.instance,
                outcome.previous_state,
                outcome.instance.state,
                "reported by heartbeat",
            );
            self.dispatch(notification, deadline).await;
        }

        Ok(Response::new(HeartbeatResponse {
            commands: outcome.commands.into_iter().map(Into::into).collect(),
        }))
    }

    async fn send_idle_notification(
        &self,
        request: Request<IdleNotificationRequest>,
    ) -> Result<Response<IdleNotificationResponse>, Status> {
        let deadline = deadline_of(&request);
        let req = request.into_inner();

        let report = IdleReport {
            instance_id: req.instance_id,
            idle_since: from_epoch_secs(req.idle_since).map_err(invalid_argument)?,
            idle_duration: secs_to_duration(req.idle_duration).map_err(invalid_argument)?,
            resource_usage: req.resource_usage,
        };

        let decision = deadline.run(self.registry.record_idle(report)).await?;
        self.metrics.record_idle_decision(decision.action);

        let notification =
            idle_notification(&decision.instance, decision.idle_duration, decision.action);
        self.dispatch(notification, deadline).await;

        Ok(Response::new(IdleNotificationResponse {
            action: decision.action.as_str().to_string(),
        }))
    }

    async fn report_state_change(
        &self,
        request: Request<StateChangeRequest>,
    ) -> Result<Response<StateChangeResponse>, Status> {
        let deadline = deadline_of(&request);
        let req = request.into_inner();

        let states = state_from_wire(req.previous_state)
            .and_then(|previous| state_from_wire(req.current_state).map(|current| (previous, current)));
        let (previous_state, current_state) = match states {
            Ok(states) => states,
            Err(error) => {
                return Ok(Response::new(StateChangeResponse {
                    acknowledged: false,
                    error: ControlPlaneError::from(error).to_string(),
                }))
            }
        };

        let report = StateChangeReport {
            instance_id: req.instance_id,
            previous_state,
            current_state,
            reason: req.reason,
        };
        let reason = report.reason.clone();

        match deadline.run(self.registry.apply_state_change(report)).await {
            Ok(outcome) => {
                let notification = state_change_notification(
                    &outcome.instance,
                    outcome.previous_state,
                    outcome.instance.state,
                    &reason,
                );
                self.dispatch(notification, deadline).await;

                Ok(Response::new(StateChangeResponse {
                    acknowledged: true,
                    error: String::new(),
                }))
            }
            Err(error) => Ok(Response::new(StateChangeResponse {
                acknowledged: false,
                error: business_message(error)?,
            })),
        }
    }
}
