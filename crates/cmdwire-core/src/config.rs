//! TOML configuration shared by both endpoints.
//!
//! Endpoint configs (`ServerConfig`, `ClientConfig`) embed a
//! [`ProtocolConfig`] table and load through [`load`] / [`from_toml_str`].
//!
//! ```toml
//! [protocol]
//! header_len = 16
//! max_frame_size = 16777216
//! grammar = "marker"
//! ```
//!
//! # Serde default values
//!
//! Every field carries `#[serde(default = "...")]`, so an empty file (or a
//! missing one, see [`load`]) yields a working configuration.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::{FrameCodec, Grammar, WireCodec, DEFAULT_HEADER_LEN, DEFAULT_MAX_FRAME_SIZE};

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A value parsed but cannot be used.
    #[error("invalid config value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Wire settings.  Both ends of a connection must agree on all of them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProtocolConfig {
    /// Width of the decimal length header in bytes.
    #[serde(default = "default_header_len")]
    pub header_len: usize,
    /// Largest accepted frame body.  `0` disables the limit.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
    /// Body grammar: `"marker"` (`$CMD$...`) or `"tagged"`.
    #[serde(default)]
    pub grammar: Grammar,
}

fn default_header_len() -> usize {
    DEFAULT_HEADER_LEN
}
fn default_max_frame_size() -> usize {
    DEFAULT_MAX_FRAME_SIZE
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            header_len: default_header_len(),
            max_frame_size: default_max_frame_size(),
            grammar: Grammar::default(),
        }
    }
}

impl ProtocolConfig {
    /// Checks the values that would make framing impossible.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.header_len == 0 {
            return Err(ConfigError::Invalid {
                field: "header_len",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.max_frame_size > 0 {
            let digits = self.max_frame_size.to_string().len();
            if digits > self.header_len {
                return Err(ConfigError::Invalid {
                    field: "max_frame_size",
                    reason: format!(
                        "{} needs {digits} header digits but header_len is {}",
                        self.max_frame_size, self.header_len
                    ),
                });
            }
        }
        Ok(())
    }

    /// Builds the codec these settings describe.
    pub fn codec(&self) -> WireCodec {
        let frame = FrameCodec::new(self.header_len);
        let frame = match self.max_frame_size {
            0 => frame.without_limit(),
            limit => frame.with_max_frame_size(limit),
        };
        WireCodec::new(frame, self.grammar)
    }
}

/// Parses a config from TOML text.
pub fn from_toml_str<T: DeserializeOwned>(content: &str) -> Result<T, ConfigError> {
    Ok(toml::from_str(content)?)
}

/// Loads a config file, returning `T::default()` if it does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load<T: DeserializeOwned + Default>(path: impl AsRef<Path>) -> Result<T, ConfigError> {
    let path = path.as_ref();
    match std::fs::read_to_string(path) {
        Ok(content) => from_toml_str(&content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Writes `config` as pretty TOML, creating parent directories.
pub fn save<T: Serialize>(config: &T, path: impl AsRef<Path>) -> Result<(), ConfigError> {
    let path = path.as_ref();
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}
