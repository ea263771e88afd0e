use crate::shared::error::{ControlPlaneError, ControlPlaneResult};
use snoozer_providers::ProviderConfig;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

const NOTIFIER_PREFIX: &str = "SNOOZER_NOTIFIER_";

#[derive(Debug, Clone, PartialEq)]
pub struct ControlPlaneConfig {
    pub bind_addr: IpAddr,
    /// Operator HTTP port; the agent protocol listens on the next port up.
    pub control_port: u16,
    /// Notification providers to build from the registry, in order.
    pub notifiers: Vec<String>,
    pub notifier_config: HashMap<String, ProviderConfig>,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            control_port: 8080,
            notifiers: vec!["log".to_string()],
            notifier_config: HashMap::new(),
        }
    }
}

impl ControlPlaneConfig {
    pub fn from_env() -> ControlPlaneResult<Self> {
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars<I>(vars: I) -> ControlPlaneResult<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut config = Self::default();

        for (key, value) in vars {
            match key.as_str() {
                "SNOOZER_BIND_ADDR" => {
                    config.bind_addr = value.trim().parse().map_err(|_| {
                        ControlPlaneError::Config(format!("SNOOZER_BIND_ADDR: invalid address '{value}'"))
                    })?;
                }
                "SNOOZER_CONTROL_PORT" => {
                    config.control_port = value.trim().parse().map_err(|_| {
                        ControlPlaneError::Config(format!("SNOOZER_CONTROL_PORT: invalid port '{value}'"))
                    })?;
                }
                "SNOOZER_NOTIFIERS" => {
                    config.notifiers = value
                        .split(',')
                        .map(|name| name.trim().to_ascii_lowercase())
                        .filter(|name| !name.is_empty())
                        .collect();
                }
                _ => {
                    if let Some(rest) = key.strip_prefix(NOTIFIER_PREFIX) {
                        let (name, entry) = rest.split_once('_').ok_or_else(|| {
                            ControlPlaneError::Config(format!(
                                "{key}: expected {NOTIFIER_PREFIX}<NAME>_<KEY>"
                            ))
                        })?;
                        config
                            .notifier_config
                            .entry(name.to_ascii_lowercase())
                            .or_default()
                            .insert(entry.to_ascii_lowercase(), config_value(&value));
                    }
                }
            }
        }

        if config.control_port == u16::MAX {
            return Err(ControlPlaneError::Config(
                "SNOOZER_CONTROL_PORT leaves no room for the agent port".to_string(),
            ));
        }

        Ok(config)
    }

    pub fn http_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.control_port)
    }

    pub fn agent_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.control_port + 1)
    }

    pub fn provider_config(&self, name: &str) -> ProviderConfig {
        self.notifier_config.get(name).cloned().unwrap_or_default()
    }
}

/// Numbers and booleans keep their JSON type, anything else is a string.
fn config_value(raw: &str) -> serde_json::Value {
    match serde_json::from_str::<serde_json::Value>(raw.trim()) {
        Ok(value @ (serde_json::Value::Number(_) | serde_json::Value::Bool(_))) => value,
        _ => serde_json::Value::String(raw.to_string()),
    }
}
