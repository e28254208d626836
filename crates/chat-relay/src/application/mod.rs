//! Application layer for chat-relay.
//!
//! The connection registry and fanout engine.  Everything here is written
//! against the [`MessageSink`] trait, never against a socket, so the whole
//! layer is testable without a network.
//!
//! # Responsibilities
//!
//! - Tracking which connections are eligible to receive fanout (`registry`)
//! - Carrying decoded messages from reader tasks to the dispatcher
//!   (`inbound_queue`)
//! - Draining the queue and delivering each message to every registered
//!   connection with bounded writes (`dispatcher`)
//!
//! # What does NOT belong here?
//!
//! - Accepting sockets or performing the WebSocket handshake
//! - WebSocket framing (handled by tokio-tungstenite)

pub mod dispatcher;
pub mod inbound_queue;
pub mod registry;
pub mod sink;

pub use dispatcher::{DispatchSummary, Dispatcher, FanoutReport};
pub use inbound_queue::{inbound_queue, EnqueueError, InboundReceiver, InboundSender};
pub use registry::{ConnectionHandle, ConnectionRegistry};
pub use sink::{MessageSink, RelayError};
