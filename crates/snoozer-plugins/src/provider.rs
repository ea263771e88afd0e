use async_trait::async_trait;
use chrono::{DateTime, Utc};
use snoozer_proto::v1::provider_plugin_client::ProviderPluginClient;
use snoozer_proto::v1::{self, Empty};
use std::fmt;
use std::time::Duration;
use tonic::transport::Channel;

use crate::PluginError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Aws,
    Azure,
    Gcp,
    Mock,
    Other(String),
}

impl ProviderKind {
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "aws" => ProviderKind::Aws,
            "azure" => ProviderKind::Azure,
            "gcp" => ProviderKind::Gcp,
            "mock" => ProviderKind::Mock,
            other => ProviderKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ProviderKind::Aws => "aws",
            ProviderKind::Azure => "azure",
            ProviderKind::Gcp => "gcp",
            ProviderKind::Mock => "mock",
            ProviderKind::Other(name) => name,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Instance metadata as reported by a provider plugin.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceInfo {
    pub id: String,
    pub name: String,
    pub instance_type: String,
    pub region: String,
    pub zone: String,
    pub state: String,
    pub launch_time: Option<DateTime<Utc>>,
}

impl From<v1::InstanceInfo> for InstanceInfo {
    fn from(info: v1::InstanceInfo) -> Self {
        let launch_time = if info.launch_time > 0 {
            DateTime::<Utc>::from_timestamp(info.launch_time, 0)
        } else {
            None
        };
        Self {
            id: info.id,
            name: info.name,
            instance_type: info.r#type,
            region: info.region,
            zone: info.zone,
            state: info.state,
            launch_time,
        }
    }
}

/// Capability interface of a cloud provider, regardless of where it runs.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;
    async fn get_instance_info(&self) -> Result<InstanceInfo, PluginError>;
    async fn stop_instance(&self) -> Result<(), PluginError>;
    async fn start_instance(&self) -> Result<(), PluginError>;
    async fn provider_name(&self) -> Result<String, PluginError>;
    async fn provider_version(&self) -> Result<String, PluginError>;
    async fn shutdown(&self) -> Result<(), PluginError>;
}

/// [`CloudProvider`] backed by a plugin subprocess over gRPC.
#[derive(Debug, Clone)]
pub struct PluginProvider {
    plugin_id: String,
    kind: ProviderKind,
    client: ProviderPluginClient<Channel>,
    rpc_timeout: Duration,
}

impl PluginProvider {
    pub(crate) fn new(
        plugin_id: impl Into<String>,
        kind: ProviderKind,
        client: ProviderPluginClient<Channel>,
        rpc_timeout: Duration,
    ) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            kind,
            client,
            rpc_timeout,
        }
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    fn request(&self) -> tonic::Request<Empty> {
        let mut request = tonic::Request::new(Empty {});
        request.set_timeout(self.rpc_timeout);
        request
    }
}

#[async_trait]
impl CloudProvider for PluginProvider {
    fn kind(&self) -> ProviderKind {
        self.kind.clone()
    }

    async fn get_instance_info(&self) -> Result<InstanceInfo, PluginError> {
        let response = self.client.clone().get_instance_info(self.request()).await?;
        Ok(response.into_inner().into())
    }

    async fn stop_instance(&self) -> Result<(), PluginError> {
        self.client.clone().stop_instance(self.request()).await?;
        Ok(())
    }

    async fn start_instance(&self) -> Result<(), PluginError> {
        self.client.clone().start_instance(self.request()).await?;
        Ok(())
    }

    async fn provider_name(&self) -> Result<String, PluginError> {
        let response = self.client.clone().get_provider_name(self.request()).await?;
        Ok(response.into_inner().name)
    }

    async fn provider_version(&self) -> Result<String, PluginError> {
        let response = self
            .client
            .clone()
            .get_provider_version(self.request())
            .await?;
        Ok(response.into_inner().version)
    }

    async fn shutdown(&self) -> Result<(), PluginError> {
        self.client.clone().shutdown(self.request()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_from_name() {
        assert_eq!(ProviderKind::from_name("AWS"), ProviderKind::Aws);
        assert_eq!(ProviderKind::from_name("azure"), ProviderKind::Azure);
        assert_eq!(ProviderKind::from_name(" gcp "), ProviderKind::Gcp);
        assert_eq!(ProviderKind::from_name("mock"), ProviderKind::Mock);
        assert_eq!(
            ProviderKind::from_name("hetzner"),
            ProviderKind::Other("hetzner".to_string())
        );
        assert_eq!(ProviderKind::from_name("hetzner").to_string(), "hetzner");
    }

    #[test]
    fn test_instance_info_from_wire() {
        let info: InstanceInfo = v1::InstanceInfo {
            id: "i-123".to_string(),
            name: "builder".to_string(),
            r#type: "m5.large".to_string(),
            region: "eu-west-1".to_string(),
            zone: "eu-west-1a".to_string(),
            state: "running".to_string(),
            launch_time: 1_700_000_000,
        }
        .into();

        assert_eq!(info.instance_type, "m5.large");
        assert_eq!(info.launch_time.map(|t| t.timestamp()), Some(1_700_000_000));

        let unknown: InstanceInfo = v1::InstanceInfo::default().into();
        assert_eq!(unknown.launch_time, None);
    }
}
