//! Provider plugin lifecycle.
//!
//! A provider plugin is an executable in the plugins directory named
//! `snoozer-provider-<id>`. The [`PluginManager`] finds candidates, checks
//! their digest against a trust manifest when authentication is enabled,
//! spawns each one as a subprocess and completes a handshake before exposing
//! it through the [`CloudProvider`] capability interface. No RPC crosses the
//! plugin boundary before the handshake has succeeded.

pub mod auth;
pub mod discovery;
pub mod handshake;
pub mod manager;
pub mod provider;

use std::time::Duration;
use thiserror::Error;

pub use auth::{Authenticator, TrustManifest};
pub use discovery::{discover, PluginCandidate};
pub use handshake::{Capability, Handshake};
pub use manager::{DiscoveryReport, PluginManager, PluginManagerConfig, PluginState, PluginSummary};
pub use provider::{CloudProvider, InstanceInfo, PluginProvider, ProviderKind};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PluginError {
    #[error("Plugins directory unavailable: {0}")]
    Discovery(String),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("Trust manifest error: {0}")]
    Manifest(String),
    #[error("Authentication failed for plugin '{plugin}': {reason}")]
    AuthenticationFailed { plugin: String, reason: String },
    #[error("Failed to spawn plugin '{plugin}': {reason}")]
    Spawn { plugin: String, reason: String },
    #[error("Handshake with plugin '{plugin}' timed out after {timeout:?}")]
    HandshakeTimeout { plugin: String, timeout: Duration },
    #[error("Handshake with plugin '{plugin}' failed: {reason}")]
    Handshake { plugin: String, reason: String },
    #[error("Plugin '{plugin}' was shut down during launch")]
    Cancelled { plugin: String },
    #[error("Plugin not found: {0}")]
    NotFound(String),
    #[error("Plugin '{plugin}' is not ready (state: {state})")]
    NotReady { plugin: String, state: PluginState },
    #[error("Plugin RPC failed: {0}")]
    Rpc(String),
}

impl From<std::io::Error> for PluginError {
    fn from(e: std::io::Error) -> Self {
        PluginError::Io(e.to_string())
    }
}

impl From<tonic::Status> for PluginError {
    fn from(status: tonic::Status) -> Self {
        PluginError::Rpc(status.to_string())
    }
}
