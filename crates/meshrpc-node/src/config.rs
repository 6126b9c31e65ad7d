//! Node configuration
//!
//! Plain values with defaults; loading them from a file is the embedding
//! application's business, though [`NodeConfig::from_json`] covers the common case.

use std::path::Path;
use std::time::Duration;

use meshrpc_common::protocol::error::{MeshError, Result};
use serde::{Deserialize, Serialize};

/// How a listener port is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortSetting {
    /// Bind any free port.
    #[default]
    Auto,
    /// Do not offer this transport.
    Disabled,
    /// Bind exactly this port.
    Fixed(u16),
}

impl PortSetting {
    /// Maps the conventional numeric form: omitted = auto, 0 = disabled.
    pub fn from_port(port: Option<u16>) -> Self {
        match port {
            None => PortSetting::Auto,
            Some(0) => PortSetting::Disabled,
            Some(port) => PortSetting::Fixed(port),
        }
    }

    /// Port to pass to `bind`, or `None` if disabled.
    pub fn bind_port(self) -> Option<u16> {
        match self {
            PortSetting::Auto => Some(0),
            PortSetting::Disabled => None,
            PortSetting::Fixed(port) => Some(port),
        }
    }
}

/// Directory heartbeat period and the bounds it is clamped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(with = "millis")]
    pub interval: Duration,
    #[serde(with = "millis")]
    pub min: Duration,
    #[serde(with = "millis")]
    pub max: Duration,
}

impl HeartbeatConfig {
    pub fn effective_interval(&self) -> Duration {
        self.interval.clamp(self.min, self.max.max(self.min))
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            min: Duration::from_secs(1),
            max: Duration::from_secs(60),
        }
    }
}

/// Everything a node needs to start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub version: String,
    pub name: String,
    /// Host other nodes should dial; also the bind address.
    pub host: String,
    /// Directory (watcher) addresses, `host:port` of their TCP listeners.
    pub directory: Vec<String>,
    pub tcp_port: PortSetting,
    pub udp_port: PortSetting,
    pub http_port: PortSetting,
    pub heartbeat: HeartbeatConfig,
    /// Deadline applied by calls that do not pass their own.
    #[serde(with = "millis")]
    pub call_timeout: Duration,
    /// Deadline for broadcast sends.
    #[serde(with = "millis")]
    pub broadcast_timeout: Duration,
    /// Connections idle longer than this are evicted; waiters and partial
    /// messages older than this are dropped.
    #[serde(with = "millis")]
    pub stale_after: Duration,
    /// How often maintenance runs.
    #[serde(with = "millis")]
    pub sweep_interval: Duration,
    /// Deadline for dialing a peer; also bounds liveness probes.
    #[serde(with = "millis")]
    pub dial_timeout: Duration,
    /// A connection silent for longer than this is probed before a call
    /// reuses it.
    #[serde(with = "millis")]
    pub revalidate_after: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            name: String::new(),
            host: "127.0.0.1".to_string(),
            directory: Vec::new(),
            tcp_port: PortSetting::Auto,
            udp_port: PortSetting::Auto,
            http_port: PortSetting::Auto,
            heartbeat: HeartbeatConfig::default(),
            call_timeout: Duration::from_secs(10),
            broadcast_timeout: Duration::from_secs(10),
            stale_after: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(10),
            dial_timeout: Duration::from_secs(3),
            revalidate_after: Duration::from_secs(2),
        }
    }
}

impl NodeConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Parses a JSON document; missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns `MeshError::Decode` for malformed JSON.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| MeshError::Decode(e.to_string()))
    }

    /// Reads and parses a JSON config file.
    ///
    /// # Errors
    ///
    /// Returns `MeshError::Io` if the file cannot be read and `MeshError::Decode`
    /// if it is not valid JSON.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| MeshError::Io(format!("reading {}: {}", path.display(), e)))?;
        Self::from_json(&text)
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
