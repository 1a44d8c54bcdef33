//! Configuration types for the NymphCast client.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use md5::{Digest, Md5};
use serde::Deserialize;
use uuid::Uuid;

use crate::{Error, Result};

/// Default receiver port for the control/data channel.
pub const DEFAULT_RECEIVER_PORT: u16 = 4004;

/// Default block size served per read request (2 MiB).
pub const DEFAULT_BLOCK_SIZE: usize = 2_097_152;

/// Service name queried during discovery.
pub const DEFAULT_SERVICE: &str = "_nymphcast._tcp.local";

/// Discovery settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Service name to query PTR records for.
    pub service: String,
    /// Wall-clock budget for collecting responses, in seconds.
    pub scan_time_secs: u64,
    /// Destination of the query datagram.
    pub query_addr: SocketAddr,
    /// Local address the discovery socket binds to.
    pub bind_addr: SocketAddr,
    /// Port assigned to discovered servers unless an SRV record says otherwise.
    pub server_port: u16,
}

impl DiscoveryConfig {
    /// Scan budget as a [`Duration`].
    pub fn scan_time(&self) -> Duration {
        Duration::from_secs(self.scan_time_secs)
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            service: DEFAULT_SERVICE.to_string(),
            scan_time_secs: 3,
            query_addr: SocketAddr::from(([255, 255, 255, 255], 5353)),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            server_port: DEFAULT_RECEIVER_PORT,
        }
    }
}

/// Configuration for a NymphCast controller.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Client application name.
    pub name: String,
    /// Receiver control port used by [`Controller::connect_server`](crate::Controller::connect_server).
    pub port: u16,
    /// Bytes served per read request when the receiver gives no hint.
    pub block_size: usize,
    /// Capacity of the session event channel.
    pub event_capacity: usize,
    /// Discovery settings.
    pub discovery: DiscoveryConfig,
}

impl ClientConfig {
    /// Create a configuration for the named client with default settings.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Parse a configuration from TOML text. Missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Identity string presented in the `connect` handshake.
    ///
    /// The UUID part is derived from the client name, so the same name always
    /// yields the same identity across restarts.
    pub fn identity(&self) -> String {
        let mut hasher = Md5::new();
        hasher.update(format!("nymphcast:{}", self.name).as_bytes());
        let uuid: [u8; 16] = hasher.finalize().into();
        format!("{}/{}", self.name, Uuid::from_bytes(uuid).hyphenated())
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Config("client name must not be empty".to_string()));
        }
        if self.block_size == 0 {
            return Err(Error::Config("block_size must be non-zero".to_string()));
        }
        if self.event_capacity == 0 {
            return Err(Error::Config("event_capacity must be non-zero".to_string()));
        }
        Ok(())
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: "NymphCastClient".to_string(),
            port: DEFAULT_RECEIVER_PORT,
            block_size: DEFAULT_BLOCK_SIZE,
            event_capacity: 100,
            discovery: DiscoveryConfig::default(),
        }
    }
}
