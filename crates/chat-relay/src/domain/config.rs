//! Relay configuration types.
//!
//! [`RelayConfig`] is the single source of truth for all runtime settings.
//! It is built once at startup from defaults, an optional TOML file and CLI
//! arguments (see `main.rs` and `infrastructure::config_file`), validated,
//! and then shared read-only with every task.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default TCP port the relay listens on.
pub const DEFAULT_PORT: u16 = 8000;

/// Default request path that is upgraded to a WebSocket.
pub const DEFAULT_WS_PATH: &str = "/ws";

/// Default number of messages the inbound queue holds before the overflow
/// policy applies.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Largest usable queue capacity.  The bounded channel backing the queue
/// tracks free slots with a semaphore, which cannot hold more permits.
pub const MAX_QUEUE_CAPACITY: usize = tokio::sync::Semaphore::MAX_PERMITS;

/// Default upper bound on a single write to one recipient.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default maximum size of one inbound WebSocket message.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 64 * 1024;

// ── Policy enums ──────────────────────────────────────────────────────────────

/// What a reader task does when the inbound queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// The reader waits for space.  The slow-draining queue pushes back on
    /// the client that is sending, never on anyone else.
    #[default]
    Block,
    /// The new message is dropped, counted and logged; the reader keeps going.
    Reject,
}

/// What a reader task does with a frame that does not decode to a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MalformedPolicy {
    /// Close and deregister the connection.
    #[default]
    Close,
    /// Drop the one bad frame and keep reading.
    Skip,
}

/// Error returned when a policy name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} policy '{value}' (expected one of: {expected})")]
pub struct ParsePolicyError {
    kind: &'static str,
    value: String,
    expected: &'static str,
}

impl FromStr for OverflowPolicy {
    type Err = ParsePolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "block" => Ok(Self::Block),
            "reject" => Ok(Self::Reject),
            _ => Err(ParsePolicyError {
                kind: "overflow",
                value: s.to_string(),
                expected: "block, reject",
            }),
        }
    }
}

impl fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Block => f.write_str("block"),
            Self::Reject => f.write_str("reject"),
        }
    }
}

impl FromStr for MalformedPolicy {
    type Err = ParsePolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "close" => Ok(Self::Close),
            "skip" => Ok(Self::Skip),
            _ => Err(ParsePolicyError {
                kind: "malformed-message",
                value: s.to_string(),
                expected: "close, skip",
            }),
        }
    }
}

impl fmt::Display for MalformedPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Close => f.write_str("close"),
            Self::Skip => f.write_str("skip"),
        }
    }
}

// ── RelayConfig ───────────────────────────────────────────────────────────────

/// A configuration value that cannot be used.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidConfig {
    /// A bounded channel needs room for at least one message.
    #[error("queue capacity must be at least 1")]
    ZeroQueueCapacity,

    /// More slots than the bounded channel can track.
    #[error("queue capacity {0} exceeds the maximum of {MAX_QUEUE_CAPACITY}")]
    QueueCapacityTooLarge(usize),

    /// A zero write timeout would fail every send.
    #[error("write timeout must be greater than zero")]
    ZeroWriteTimeout,

    /// Request paths always start with a slash.
    #[error("WebSocket path must start with '/', got '{0}'")]
    InvalidWsPath(String),

    /// No message would fit.
    #[error("maximum message size must be greater than zero")]
    ZeroMaxMessageBytes,
}

/// All runtime configuration for the relay.
///
/// # Example
///
/// ```rust
/// use chat_relay::domain::RelayConfig;
///
/// let cfg = RelayConfig::default();
/// assert_eq!(cfg.bind_addr.port(), 8000);
/// assert!(cfg.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RelayConfig {
    /// Address and port the WebSocket listener binds to.
    pub bind_addr: SocketAddr,

    /// Request path accepted for the WebSocket upgrade.  Requests for any
    /// other path are rejected during the handshake.
    pub ws_path: String,

    /// Capacity of the inbound queue shared by all reader tasks.
    pub queue_capacity: usize,

    /// What readers do when the inbound queue is full.
    pub overflow_policy: OverflowPolicy,

    /// Upper bound on one write to one recipient.  A recipient that does not
    /// accept a frame within this time is closed and deregistered.
    pub write_timeout: Duration,

    /// Whether the sender receives an echo of its own message.
    pub echo_to_sender: bool,

    /// What readers do with frames that do not decode.
    pub malformed_policy: MalformedPolicy,

    /// Largest inbound WebSocket message accepted, in bytes.
    pub max_message_bytes: usize,
}

impl Default for RelayConfig {
    /// | Field             | Default        |
    /// |-------------------|----------------|
    /// | bind_addr         | `0.0.0.0:8000` |
    /// | ws_path           | `/ws`          |
    /// | queue_capacity    | 1024           |
    /// | overflow_policy   | block          |
    /// | write_timeout     | 5 seconds      |
    /// | echo_to_sender    | true           |
    /// | malformed_policy  | close          |
    /// | max_message_bytes | 65536          |
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            ws_path: DEFAULT_WS_PATH.to_string(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            overflow_policy: OverflowPolicy::default(),
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            echo_to_sender: true,
            malformed_policy: MalformedPolicy::default(),
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }
}

impl RelayConfig {
    /// Checks that every value can be used to start the relay.
    ///
    /// # Errors
    ///
    /// Returns the first [`InvalidConfig`] found.
    pub fn validate(&self) -> Result<(), InvalidConfig> {
        if self.queue_capacity == 0 {
            return Err(InvalidConfig::ZeroQueueCapacity);
        }
        if self.queue_capacity > MAX_QUEUE_CAPACITY {
            return Err(InvalidConfig::QueueCapacityTooLarge(self.queue_capacity));
        }
        if self.write_timeout.is_zero() {
            return Err(InvalidConfig::ZeroWriteTimeout);
        }
        if !self.ws_path.starts_with('/') {
            return Err(InvalidConfig::InvalidWsPath(self.ws_path.clone()));
        }
        if self.max_message_bytes == 0 {
            return Err(InvalidConfig::ZeroMaxMessageBytes);
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
