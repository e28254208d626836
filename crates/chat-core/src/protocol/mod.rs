//! Protocol module containing the chat message type and the JSON codec.

pub mod codec;
pub mod messages;

pub use codec::{decode_message, decode_message_slice, encode_message, ProtocolError};
pub use messages::ChatMessage;
