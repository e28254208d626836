//! Domain layer for chat-relay.
//!
//! Pure types with no dependencies on I/O, networking, or the async runtime.
//!
//! - Configuration structures and policy enums
//! - Connection identity and lifecycle types
//! - The envelope that carries a message from a reader task to the dispatcher

pub mod config;
pub mod connection;

pub use config::{InvalidConfig, MalformedPolicy, OverflowPolicy, ParsePolicyError, RelayConfig};
pub use connection::{CloseReason, ConnectionId, ConnectionState, InboundMessage};
