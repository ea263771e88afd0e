use chrono::{DateTime, Utc};
use snoozer_core::{Command, CoreError, IdleAction, InstanceSpec, InstanceState};
use snoozer_proto::v1::agent_service_client::AgentServiceClient;
use snoozer_proto::v1::{
    HeartbeatRequest, IdleNotificationRequest, RegisterInstanceRequest, StateChangeRequest,
    UnregisterInstanceRequest,
};
use snoozer_proto::{duration_to_secs, state_to_wire, to_epoch_secs};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tonic::transport::{Channel, Endpoint};
use tonic::Status;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum AgentClientError {
    #[error("not connected to control plane")]
    NotConnected,
    #[error("invalid control plane address '{addr}': {reason}")]
    InvalidAddress { addr: String, reason: String },
    #[error("failed to connect to control plane at {addr}: {reason}")]
    Connection { addr: String, reason: String },
    #[error("{operation} failed: {status}")]
    Rpc {
        operation: &'static str,
        status: Status,
    },
    #[error("{operation} rejected by control plane: {message}")]
    Rejected {
        operation: &'static str,
        message: String,
    },
    #[error("invalid response to {operation}: {reason}")]
    InvalidResponse {
        operation: &'static str,
        reason: String,
    },
}

impl AgentClientError {
    fn rpc(operation: &'static str) -> impl FnOnce(Status) -> Self {
        move |status| AgentClientError::Rpc { operation, status }
    }
}

/// Instance-side peer of the agent protocol.
///
/// Holds at most one connection. Every call checks for it first and fails
/// with [`AgentClientError::NotConnected`] without touching the network.
/// A dropped connection is never re-established behind the caller's back.
pub struct AgentClient {
    addr: String,
    rpc_timeout: Duration,
    connection: RwLock<Option<AgentServiceClient<Channel>>>,
}

impl AgentClient {
    pub fn new(addr: impl Into<String>, rpc_timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            rpc_timeout,
            connection: RwLock::new(None),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Dials the control plane. Calling it while already connected does
    /// nothing. The dial happens outside the lock, so calls made meanwhile
    /// still fail at once with `NotConnected`.
    pub async fn connect(&self) -> Result<(), AgentClientError> {
        if self.is_connected().await {
            debug!(addr = %self.addr, "Already connected to control plane");
            return Ok(());
        }

        let endpoint = Endpoint::from_shared(self.addr.clone())
            .map_err(|e| AgentClientError::InvalidAddress {
                addr: self.addr.clone(),
                reason: e.to_string(),
            })?
            .connect_timeout(self.rpc_timeout);
        let channel = endpoint
            .connect()
            .await
            .map_err(|e| AgentClientError::Connection {
                addr: self.addr.clone(),
                reason: e.to_string(),
            })?;

        let mut connection = self.connection.write().await;
        if connection.is_some() {
            debug!(addr = %self.addr, "Concurrent connect won, dropping extra channel");
            return Ok(());
        }
        *connection = Some(AgentServiceClient::new(channel));
        info!(addr = %self.addr, "Connected to control plane");
        Ok(())
    }

    pub async fn disconnect(&self) {
        if self.connection.write().await.take().is_some() {
            info!(addr = %self.addr, "Disconnected from control plane");
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.connection.read().await.is_some()
    }

    async fn client(&self) -> Result<AgentServiceClient<Channel>, AgentClientError> {
        self.connection
            .read()
            .await
            .clone()
            .ok_or(AgentClientError::NotConnected)
    }

    fn request<T>(&self, message: T) -> tonic::Request<T> {
        let mut request = tonic::Request::new(message);
        request.set_timeout(self.rpc_timeout);
        request
    }

    /// Registers this instance and returns the agent ID assigned to it.
    pub async fn register_instance(&self, spec: InstanceSpec) -> Result<String, AgentClientError> {
        const OPERATION: &str = "RegisterInstance";
        let mut client = self.client().await?;

        let response = client
            .register_instance(self.request(RegisterInstanceRequest::from(spec)))
            .await
            .map_err(AgentClientError::rpc(OPERATION))?
            .into_inner();

        if !response.success {
            return Err(AgentClientError::Rejected {
                operation: OPERATION,
                message: response.error,
            });
        }
        Ok(response.agent_id)
    }

    pub async fn unregister_instance(&self, instance_id: &str) -> Result<(), AgentClientError> {
        const OPERATION: &str = "UnregisterInstance";
        let mut client = self.client().await?;

        let response = client
            .unregister_instance(self.request(UnregisterInstanceRequest {
                instance_id: instance_id.to_string(),
            }))
            .await
            .map_err(AgentClientError::rpc(OPERATION))?
            .into_inner();

        if !response.success {
            return Err(AgentClientError::Rejected {
                operation: OPERATION,
                message: response.error,
            });
        }
        Ok(())
    }

    /// Reports liveness and returns the commands queued for this instance.
    pub async fn send_heartbeat(
        &self,
        instance_id: &str,
        state: InstanceState,
        resource_usage: HashMap<String, f64>,
        at: DateTime<Utc>,
    ) -> Result<Vec<Command>, AgentClientError> {
        let mut client = self.client().await?;

        let response = client
            .send_heartbeat(self.request(HeartbeatRequest {
                instance_id: instance_id.to_string(),
                timestamp: to_epoch_secs(at),
                state: state_to_wire(state),
                resource_usage,
            }))
            .await
            .map_err(AgentClientError::rpc("SendHeartbeat"))?
            .into_inner();

        Ok(response.commands.into_iter().map(Command::from).collect())
    }

    pub async fn send_idle_notification(
        &self,
        instance_id: &str,
        idle_since: DateTime<Utc>,
        idle_duration: Duration,
        resource_usage: HashMap<String, f64>,
    ) -> Result<IdleAction, AgentClientError> {
        const OPERATION: &str = "SendIdleNotification";
        let mut client = self.client().await?;

        let response = client
            .send_idle_notification(self.request(IdleNotificationRequest {
                instance_id: instance_id.to_string(),
                idle_since: to_epoch_secs(idle_since),
                idle_duration: duration_to_secs(idle_duration),
                resource_usage,
            }))
            .await
            .map_err(AgentClientError::rpc(OPERATION))?
            .into_inner();

        response
            .action
            .parse()
            .map_err(|e: CoreError| AgentClientError::InvalidResponse {
                operation: OPERATION,
                reason: e.to_string(),
            })
    }

    pub async fn report_state_change(
        &self,
        instance_id: &str,
        previous: InstanceState,
        current: InstanceState,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<(), AgentClientError> {
        const OPERATION: &str = "ReportStateChange";
        let mut client = self.client().await?;

        let response = client
            .report_state_change(self.request(StateChangeRequest {
                instance_id: instance_id.to_string(),
                previous_state: state_to_wire(previous),
                current_state: state_to_wire(current),
                timestamp: to_epoch_secs(at),
                reason: reason.to_string(),
            }))
            .await
            .map_err(AgentClientError::rpc(OPERATION))?
            .into_inner();

        if !response.acknowledged {
            return Err(AgentClientError::Rejected {
                operation: OPERATION,
                message: response.error,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_client() -> AgentClient {
        // Nothing listens here; any attempted I/O would fail with Connection.
        AgentClient::new("http://127.0.0.1:9", Duration::from_millis(200))
    }

    #[tokio::test]
    async fn property_every_operation_requires_connect() {
        let client = create_test_client();
        let now = Utc::now();

        assert!(matches!(
            client
                .register_instance(InstanceSpec {
                    instance_id: "i-1".to_string(),
                    instance_type: "t3.micro".to_string(),
                    region: "us-east-1".to_string(),
                    zone: "us-east-1a".to_string(),
                    provider: "aws".to_string(),
                    thresholds: HashMap::new(),
                    nap_time: Duration::from_secs(60),
                })
                .await,
            Err(AgentClientError::NotConnected)
        ));
        assert!(matches!(
            client.unregister_instance("i-1").await,
            Err(AgentClientError::NotConnected)
        ));
        assert!(matches!(
            client
                .send_heartbeat("i-1", InstanceState::Running, HashMap::new(), now)
                .await,
            Err(AgentClientError::NotConnected)
        ));
        assert!(matches!(
            client
                .send_idle_notification("i-1", now, Duration::from_secs(5), HashMap::new())
                .await,
            Err(AgentClientError::NotConnected)
        ));
        assert!(matches!(
            client
                .report_state_change("i-1", InstanceState::Running, InstanceState::Idle, "x", now)
                .await,
            Err(AgentClientError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_calls_fail_fast_while_dial_is_pending() {
        // Unroutable address: the dial hangs until its timeout or fails outright.
        let client = std::sync::Arc::new(AgentClient::new(
            "http://10.255.255.1:8081",
            Duration::from_secs(3),
        ));
        let dialing = tokio::spawn({
            let client = client.clone();
            async move { client.connect().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let started = tokio::time::Instant::now();
        let result = client
            .send_heartbeat("i-1", InstanceState::Running, HashMap::new(), Utc::now())
            .await;
        assert!(matches!(result, Err(AgentClientError::NotConnected)));
        assert!(started.elapsed() < Duration::from_millis(250));

        dialing.abort();
    }

    #[tokio::test]
    async fn test_invalid_address_is_rejected_before_dialing() {
        let client = AgentClient::new("not a uri", Duration::from_millis(200));
        assert!(matches!(
            client.connect().await,
            Err(AgentClientError::InvalidAddress { .. })
        ));
        assert!(!client.is_connected().await);
    }

    #[tokio::test]
    async fn test_failed_dial_leaves_client_disconnected() {
        let client = create_test_client();
        assert!(matches!(
            client.connect().await,
            Err(AgentClientError::Connection { .. })
        ));
        assert!(!client.is_connected().await);
    }

    #[tokio::test]
    async fn test_disconnect_without_connection_is_harmless() {
        let client = create_test_client();
        client.disconnect().await;
        assert!(!client.is_connected().await);
    }
}
