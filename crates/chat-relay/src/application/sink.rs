//! The write side of a connection, as seen by the fanout engine.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use chat_core::ProtocolError;

/// Errors that can occur while relaying to one connection.
///
/// Every variant is local to a single connection: the caller deregisters that
/// connection and carries on with the others.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The connection was already closed.
    #[error("connection closed")]
    Closed,

    /// The underlying transport reported an error.
    #[error("transport error: {0}")]
    Transport(String),

    /// The peer did not accept the frame within the write timeout.
    #[error("write timed out after {0:?}")]
    WriteTimeout(Duration),

    /// The message could not be encoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Sends encoded chat frames to one connected client.
///
/// The infrastructure implementation wraps the write half of a WebSocket;
/// tests use recording doubles.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Sends one already-encoded message as a text frame.
    async fn send_text(&self, text: &str) -> Result<(), RelayError>;

    /// Closes the transport.  Calling it on a closed sink is a no-op.
    async fn close(&self);
}
