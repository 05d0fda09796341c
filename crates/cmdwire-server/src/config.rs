//! Server configuration.
//!
//! ```toml
//! bind_address = "0.0.0.0"
//! port = 5000
//! max_connections = 0          # 0 = unlimited
//! background = false           # run the poll loop on a background task
//! keepalive_interval_secs = 0  # 0 = no keepalive probes
//! allow_markers = false
//!
//! [protocol]
//! header_len = 16
//! max_frame_size = 16777216
//! grammar = "marker"
//! ```

use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use cmdwire_core::config::{self, ConfigError, ProtocolConfig};
use serde::{Deserialize, Serialize};

/// Construction-time settings for a [`crate::Server`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// IP address to listen on.  `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,
    /// TCP port.  `0` lets the OS pick one (see `Server::local_addr`).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Maximum simultaneous connections; excess sockets are closed at once.
    /// `0` means unlimited.
    #[serde(default)]
    pub max_connections: usize,
    /// Whether the relay binary runs the poll loop in the background.
    #[serde(default)]
    pub background: bool,
    /// Seconds between keepalive sweeps.  `0` disables keepalive.
    #[serde(default)]
    pub keepalive_interval_secs: u64,
    /// Let payloads contain grammar markers (marker grammar only).
    #[serde(default)]
    pub allow_markers: bool,
    /// Wire settings shared with every client.
    #[serde(default)]
    pub protocol: ProtocolConfig,
}

fn default_bind_address() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}
fn default_port() -> u16 {
    5000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            max_connections: 0,
            background: false,
            keepalive_interval_secs: 0,
            allow_markers: false,
            protocol: ProtocolConfig::default(),
        }
    }
}

impl ServerConfig {
    /// A config listening on `127.0.0.1` with an OS-assigned port.
    pub fn loopback() -> Self {
        Self {
            bind_address: IpAddr::from([127, 0, 0, 1]),
            port: 0,
            ..Self::default()
        }
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    pub fn keepalive_interval(&self) -> Option<Duration> {
        (self.keepalive_interval_secs > 0).then(|| Duration::from_secs(self.keepalive_interval_secs))
    }

    /// Parses a config from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let cfg: Self = config::from_toml_str(content)?;
        cfg.protocol.validate()?;
        Ok(cfg)
    }

    /// Loads a config file, falling back to defaults if it does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let cfg: Self = config::load(path)?;
        cfg.protocol.validate()?;
        Ok(cfg)
    }

    /// Writes this config as TOML, e.g. to seed a default config file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        config::save(self, path)
    }
}
