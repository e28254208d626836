//! # chat-core
//!
//! Shared library for the chat relay containing the chat message type and
//! its JSON wire codec.
//!
//! This crate has no dependencies on sockets, async runtimes, or OS APIs, so
//! both the relay server and any client tooling can use it.
//!
//! # Wire format
//!
//! Every chat message travels as one JSON object with named fields:
//!
//! ```json
//! {"email":"a@x.com","username":"alice","message":"hi"}
//! ```
//!
//! Field names (not positions) carry the meaning, so a sender may add
//! optional fields without breaking older receivers: unknown fields are
//! ignored on decode.

pub mod protocol;

// Re-export the most-used items at the crate root so callers can write
// `chat_core::ChatMessage` instead of `chat_core::protocol::messages::ChatMessage`.
pub use protocol::codec::{decode_message, decode_message_slice, encode_message, ProtocolError};
pub use protocol::messages::ChatMessage;
