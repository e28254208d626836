//! TOML configuration file for the relay.
//!
//! The file is optional.  When given with `--config`, it provides the base
//! configuration; command-line flags and environment variables override it.
//! Every field has a default, so a file only needs the values it changes:
//!
//! ```toml
//! [server]
//! bind_address = "127.0.0.1"
//! port = 9000
//! ws_path = "/ws"
//! max_message_bytes = 65536
//! log_level = "info"
//!
//! [relay]
//! queue_capacity = 1024
//! overflow_policy = "block"     # or "reject"
//! write_timeout_ms = 5000
//! echo_to_sender = true
//! malformed_policy = "close"    # or "skip"
//! ```

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::config::{
    InvalidConfig, MalformedPolicy, OverflowPolicy, RelayConfig, DEFAULT_MAX_MESSAGE_BYTES,
    DEFAULT_PORT, DEFAULT_QUEUE_CAPACITY, DEFAULT_WRITE_TIMEOUT, DEFAULT_WS_PATH,
};

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

    /// `bind_address` is not an IP address.
    #[error("invalid bind address '{0}'")]
    BindAddress(String),

    /// A value parsed but cannot be used.
    #[error(transparent)]
    Invalid(#[from] InvalidConfig),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RelayFileConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub relay: RelaySection,
}

/// Listener and process settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSection {
    /// IP address to bind.  `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// TCP port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Request path upgraded to a WebSocket.
    #[serde(default = "default_ws_path")]
    pub ws_path: String,
    /// Largest inbound WebSocket message accepted, in bytes.
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Fanout engine settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelaySection {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default)]
    pub overflow_policy: OverflowPolicy,
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    #[serde(default = "default_true")]
    pub echo_to_sender: bool,
    #[serde(default)]
    pub malformed_policy: MalformedPolicy,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_ws_path() -> String {
    DEFAULT_WS_PATH.to_string()
}
fn default_max_message_bytes() -> usize {
    DEFAULT_MAX_MESSAGE_BYTES
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}
fn default_write_timeout_ms() -> u64 {
    DEFAULT_WRITE_TIMEOUT.as_millis() as u64
}
fn default_true() -> bool {
    true
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            ws_path: default_ws_path(),
            max_message_bytes: default_max_message_bytes(),
            log_level: default_log_level(),
        }
    }
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            overflow_policy: OverflowPolicy::default(),
            write_timeout_ms: default_write_timeout_ms(),
            echo_to_sender: default_true(),
            malformed_policy: MalformedPolicy::default(),
        }
    }
}

impl RelayFileConfig {
    /// Converts the file schema into a validated [`RelayConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::BindAddress`] if `bind_address` is not an IP
    /// address, or [`ConfigError::Invalid`] if a value fails validation.
    pub fn to_relay_config(&self) -> Result<RelayConfig, ConfigError> {
        let ip: IpAddr = self
            .server
            .bind_address
            .parse()
            .map_err(|_| ConfigError::BindAddress(self.server.bind_address.clone()))?;

        let config = RelayConfig {
            bind_addr: SocketAddr::new(ip, self.server.port),
            ws_path: self.server.ws_path.clone(),
            queue_capacity: self.relay.queue_capacity,
            overflow_policy: self.relay.overflow_policy,
            write_timeout: Duration::from_millis(self.relay.write_timeout_ms),
            echo_to_sender: self.relay.echo_to_sender,
            malformed_policy: self.relay.malformed_policy,
            max_message_bytes: self.server.max_message_bytes,
        };
        config.validate()?;
        Ok(config)
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Parses a configuration file from TOML text.
///
/// # Errors
///
/// Returns [`ConfigError::Parse`] if the TOML is malformed.
pub fn parse_config(content: &str) -> Result<RelayFileConfig, ConfigError> {
    Ok(toml::from_str(content)?)
}

/// Loads a configuration file from `path`.
///
/// Unlike a platform default location, an explicitly named file must exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] if the file cannot be read and
/// [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<RelayFileConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&content)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
