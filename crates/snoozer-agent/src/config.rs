use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::AgentError;

const THRESHOLD_PREFIX: &str = "SNOOZER_THRESHOLD_";

#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    pub control_plane_addr: String,
    pub plugins_dir: PathBuf,
    pub plugin_auth: bool,
    pub trust_manifest: PathBuf,
    pub handshake_timeout: Duration,
    pub heartbeat_interval: Duration,
    /// Deadline carried on every call to the control plane and the plugin.
    pub rpc_timeout: Duration,
    pub nap_time: Duration,
    pub thresholds: HashMap<String, f64>,
    /// Plugin id of the provider representing this instance; the first ready
    /// plugin when unset.
    pub provider: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        let plugins_dir = PathBuf::from("./plugins");
        Self {
            control_plane_addr: "http://127.0.0.1:8081".to_string(),
            trust_manifest: plugins_dir.join("trust.json"),
            plugins_dir,
            plugin_auth: true,
            handshake_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
            rpc_timeout: Duration::from_secs(5),
            nap_time: Duration::from_secs(1800),
            thresholds: HashMap::from([("cpu".to_string(), 0.1)]),
            provider: None,
        }
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, AgentError> {
    value
        .trim()
        .parse()
        .map_err(|_| AgentError::Config(format!("{key}: invalid value '{value}'")))
}

fn parse_secs(key: &str, value: &str) -> Result<Duration, AgentError> {
    let secs: u64 = parse(key, value)?;
    if secs == 0 {
        return Err(AgentError::Config(format!("{key} must be greater than zero")));
    }
    Ok(Duration::from_secs(secs))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, AgentError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(AgentError::Config(format!("{key}: expected a boolean, got '{value}'"))),
    }
}

impl AgentConfig {
    pub fn from_env() -> Result<Self, AgentError> {
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars<I>(vars: I) -> Result<Self, AgentError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut config = Self::default();
        let mut trust_manifest = None;

        for (key, value) in vars {
            match key.as_str() {
                "SNOOZER_CONTROL_PLANE_ADDR" => config.control_plane_addr = value.trim().to_string(),
                "SNOOZER_PLUGINS_DIR" => config.plugins_dir = PathBuf::from(value.trim()),
                "SNOOZER_PLUGIN_AUTH" => config.plugin_auth = parse_bool(&key, &value)?,
                "SNOOZER_TRUST_MANIFEST" => trust_manifest = Some(PathBuf::from(value.trim())),
                "SNOOZER_HANDSHAKE_TIMEOUT_SECS" => {
                    config.handshake_timeout = parse_secs(&key, &value)?
                }
                "SNOOZER_HEARTBEAT_INTERVAL_SECS" => {
                    config.heartbeat_interval = parse_secs(&key, &value)?
                }
                "SNOOZER_RPC_TIMEOUT_SECS" => config.rpc_timeout = parse_secs(&key, &value)?,
                "SNOOZER_NAP_TIME_SECS" => config.nap_time = parse_secs(&key, &value)?,
                "SNOOZER_PROVIDER" => {
                    let provider = value.trim();
                    config.provider = (!provider.is_empty()).then(|| provider.to_string());
                }
                _ => {
                    if let Some(metric) = key.strip_prefix(THRESHOLD_PREFIX) {
                        let threshold: f64 = parse(&key, &value)?;
                        config.thresholds.insert(metric.to_ascii_lowercase(), threshold);
                    }
                }
            }
        }

        config.trust_manifest =
            trust_manifest.unwrap_or_else(|| config.plugins_dir.join("trust.json"));
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(entries: &[(&str, &str)]) -> Vec<(String, String)> {
        entries
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = AgentConfig::from_vars(Vec::new()).unwrap();
        assert_eq!(config, AgentConfig::default());
        assert_eq!(config.trust_manifest, PathBuf::from("./plugins/trust.json"));
        assert_eq!(config.thresholds["cpu"], 0.1);
        assert!(config.plugin_auth);
    }

    #[test]
    fn test_overrides() {
        let config = AgentConfig::from_vars(vars(&[
            ("SNOOZER_PLUGINS_DIR", "/opt/snoozer/plugins"),
            ("SNOOZER_PLUGIN_AUTH", "false"),
            ("SNOOZER_HEARTBEAT_INTERVAL_SECS", "15"),
            ("SNOOZER_NAP_TIME_SECS", "600"),
            ("SNOOZER_THRESHOLD_CPU", "0.25"),
            ("SNOOZER_THRESHOLD_NET_MBPS", "1.5"),
            ("SNOOZER_PROVIDER", "aws"),
        ]))
        .unwrap();

        assert_eq!(
            config.trust_manifest,
            PathBuf::from("/opt/snoozer/plugins/trust.json")
        );
        assert!(!config.plugin_auth);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(15));
        assert_eq!(config.nap_time, Duration::from_secs(600));
        assert_eq!(config.thresholds["cpu"], 0.25);
        assert_eq!(config.thresholds["net_mbps"], 1.5);
        assert_eq!(config.provider.as_deref(), Some("aws"));
    }

    #[test]
    fn test_explicit_manifest_wins() {
        let config = AgentConfig::from_vars(vars(&[
            ("SNOOZER_TRUST_MANIFEST", "/etc/snoozer/trust.json"),
            ("SNOOZER_PLUGINS_DIR", "/opt/plugins"),
        ]))
        .unwrap();
        assert_eq!(config.trust_manifest, PathBuf::from("/etc/snoozer/trust.json"));
    }

    #[test]
    fn test_invalid_values() {
        for (key, value) in [
            ("SNOOZER_PLUGIN_AUTH", "maybe"),
            ("SNOOZER_RPC_TIMEOUT_SECS", "0"),
            ("SNOOZER_NAP_TIME_SECS", "soon"),
            ("SNOOZER_THRESHOLD_CPU", "low"),
        ] {
            assert!(
                matches!(AgentConfig::from_vars(vars(&[(key, value)])), Err(AgentError::Config(_))),
                "{key}={value}"
            );
        }
    }
}
