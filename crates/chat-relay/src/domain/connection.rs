//! Connection identity and lifecycle types.

use std::fmt;

use chat_core::ChatMessage;
use uuid::Uuid;

/// Identity of one accepted WebSocket connection.
///
/// Assigned once, right after the upgrade succeeds, and used as the registry
/// key for the lifetime of the connection.  A fresh UUID v4 per connection
/// means a reconnecting client is always a new member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generates a new random connection identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ConnectionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A decoded message together with the connection it arrived on.
///
/// The origin is what lets the dispatcher honour the echo policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Connection the message was read from.
    pub origin: ConnectionId,
    /// The decoded chat message.
    pub message: ChatMessage,
}

impl InboundMessage {
    /// Wraps `message` with the connection it came from.
    pub fn new(origin: ConnectionId, message: ChatMessage) -> Self {
        Self { origin, message }
    }
}

/// Lifecycle of one connection as seen by its reader task.
///
/// ```text
/// Open ──(receive → decode → enqueue)*──▶ Closed
/// ```
///
/// There is no way back from `Closed`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Frames are being read and enqueued.
    #[default]
    Open,
    /// The reader has stopped and the connection has been deregistered.
    Closed(CloseReason),
}

impl ConnectionState {
    /// `true` while the reader is still consuming frames.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }
}

/// Why a connection's reader stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer sent a Close frame or the stream ended.
    PeerClosed,
    /// Reading from the socket failed.
    Transport(String),
    /// A frame did not decode to a chat message.
    Malformed(String),
    /// The inbound queue has been closed (server shutting down).
    QueueClosed,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerClosed => f.write_str("closed by peer"),
            Self::Transport(e) => write!(f, "transport error: {e}"),
            Self::Malformed(e) => write!(f, "malformed message: {e}"),
            Self::QueueClosed => f.write_str("inbound queue closed"),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
