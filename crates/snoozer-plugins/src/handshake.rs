use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

/// Environment variable the host sets for every plugin it launches. Plugins
/// refuse to start without it, so running one by hand fails fast.
pub const MAGIC_COOKIE_KEY: &str = "SNOOZER_PLUGIN_MAGIC_COOKIE";
pub const MAGIC_COOKIE_VALUE: &str = "5a1e7c2b9d0f4e86b3a7c1d9e2f04b68";

/// First field of the handshake line.
pub const HANDSHAKE_TAG: &str = "SNOOZER_PLUGIN";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    GetInstanceInfo,
    StopInstance,
    StartInstance,
    GetProviderName,
    GetProviderVersion,
    Shutdown,
}

impl Capability {
    pub const ALL: [Capability; 6] = [
        Capability::GetInstanceInfo,
        Capability::StopInstance,
        Capability::StartInstance,
        Capability::GetProviderName,
        Capability::GetProviderVersion,
        Capability::Shutdown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::GetInstanceInfo => "get_instance_info",
            Capability::StopInstance => "stop_instance",
            Capability::StartInstance => "start_instance",
            Capability::GetProviderName => "get_provider_name",
            Capability::GetProviderVersion => "get_provider_version",
            Capability::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Capability::ALL
            .into_iter()
            .find(|capability| capability.as_str() == value.trim())
            .ok_or_else(|| format!("unknown capability '{}'", value.trim()))
    }
}

/// What a plugin announces on the first line of its stdout:
/// `SNOOZER_PLUGIN|<protocol version>|<host:port>|<capability,...>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub protocol_version: u32,
    pub address: SocketAddr,
    pub capabilities: Vec<Capability>,
}

impl Handshake {
    pub fn parse(line: &str) -> Result<Self, String> {
        let parts: Vec<&str> = line.trim().split('|').collect();
        let [tag, version, address, capabilities] = parts.as_slice() else {
            return Err(format!(
                "expected 4 '|' separated fields, got {}",
                parts.len()
            ));
        };

        if *tag != HANDSHAKE_TAG {
            return Err(format!("unexpected handshake tag '{tag}'"));
        }

        let protocol_version = version
            .parse::<u32>()
            .map_err(|_| format!("invalid protocol version '{version}'"))?;
        let address = address
            .parse::<SocketAddr>()
            .map_err(|_| format!("invalid plugin address '{address}'"))?;
        let capabilities = capabilities
            .split(',')
            .filter(|c| !c.trim().is_empty())
            .map(Capability::from_str)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            protocol_version,
            address,
            capabilities,
        })
    }

    pub fn to_line(&self) -> String {
        let capabilities: Vec<&str> = self.capabilities.iter().map(Capability::as_str).collect();
        format!(
            "{}|{}|{}|{}",
            HANDSHAKE_TAG,
            self.protocol_version,
            self.address,
            capabilities.join(",")
        )
    }

    /// Checks the announced version and capability set against what the host
    /// speaks.
    pub fn negotiate(&self, expected_version: u32) -> Result<(), String> {
        if self.protocol_version != expected_version {
            return Err(format!(
                "protocol version mismatch: host speaks {}, plugin speaks {}",
                expected_version, self.protocol_version
            ));
        }

        let missing: Vec<&str> = Capability::ALL
            .iter()
            .filter(|capability| !self.capabilities.contains(capability))
            .map(Capability::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(format!("missing capabilities: {}", missing.join(", ")));
        }

        Ok(())
    }
}
