//! Client configuration.
//!
//! ```toml
//! server_address = "127.0.0.1"
//! port = 5000
//! name = "alice"          # optional
//! group = "g1"            # optional
//! cache_capacity = 100    # optional; omit to disable the message cache
//!
//! [protocol]              # must match the server
//! header_len = 16
//! grammar = "marker"
//! ```

use std::path::Path;

use cmdwire_core::config::{self, ConfigError, ProtocolConfig};
use serde::{Deserialize, Serialize};

/// Construction-time settings for a [`crate::Client`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    /// Host name or IP address of the server.
    #[serde(default = "default_server_address")]
    pub server_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Display name announced in the hello.  Not required to be unique.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    /// Keep the last N user frames in a [`cmdwire_core::MessageCache`].
    #[serde(default)]
    pub cache_capacity: Option<usize>,
    /// Let payloads contain grammar markers (marker grammar only).
    #[serde(default)]
    pub allow_markers: bool,
    #[serde(default)]
    pub protocol: ProtocolConfig,
}

fn default_server_address() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    5000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_address: default_server_address(),
            port: default_port(),
            name: None,
            group: None,
            cache_capacity: None,
            allow_markers: false,
            protocol: ProtocolConfig::default(),
        }
    }
}

impl ClientConfig {
    /// A config for `server_address:port` with every other field defaulted.
    pub fn new(server_address: impl Into<String>, port: u16) -> Self {
        Self {
            server_address: server_address.into(),
            port,
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn with_cache(mut self, capacity: usize) -> Self {
        self.cache_capacity = Some(capacity);
        self
    }

    pub fn with_protocol(mut self, protocol: ProtocolConfig) -> Self {
        self.protocol = protocol;
        self
    }

    /// `host:port` as used in log lines and connect errors.
    pub fn server_endpoint(&self) -> String {
        format!("{}:{}", self.server_address, self.port)
    }

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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_yields_defaults() {
        let cfg = ClientConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, ClientConfig::default());
        assert_eq!(cfg.server_endpoint(), "127.0.0.1:5000");
        assert_eq!(cfg.cache_capacity, None);
    }

    #[test]
    fn test_optional_fields_parse() {
        let cfg = ClientConfig::from_toml_str(
            r#"
            server_address = "chat.example.org"
            port = 7000
            name = "alice"
            group = "g1"
            cache_capacity = 32
            "#,
        )
        .unwrap();

        assert_eq!(cfg.server_endpoint(), "chat.example.org:7000");
        assert_eq!(cfg.name.as_deref(), Some("alice"));
        assert_eq!(cfg.group.as_deref(), Some("g1"));
        assert_eq!(cfg.cache_capacity, Some(32));
    }

    #[test]
    fn test_builder_matches_toml() {
        let built = ClientConfig::new("10.0.0.5", 6000).with_name("bob").with_cache(4);
        let parsed = ClientConfig::from_toml_str(
            "server_address = \"10.0.0.5\"\nport = 6000\nname = \"bob\"\ncache_capacity = 4\n",
        )
        .unwrap();
        assert_eq!(built, parsed);
    }

    #[test]
    fn test_load_missing_file_returns_default() {
        let cfg = ClientConfig::load("/definitely/not/here/cmdwire-client.toml").unwrap();
        assert_eq!(cfg, ClientConfig::default());
    }

    #[test]
    fn test_save_then_load_keeps_name_and_cache() {
        // Arrange
        let path = std::env::temp_dir().join(format!("cmdwire-client-{}.toml", std::process::id()));
        let cfg = ClientConfig::new("10.0.0.2", 7000).with_name("alice").with_cache(16);

        // Act
        cfg.save(&path).unwrap();
        let loaded = ClientConfig::load(&path).unwrap();

        // Assert
        assert_eq!(loaded, cfg);
        std::fs::remove_file(&path).ok();
    }
}
