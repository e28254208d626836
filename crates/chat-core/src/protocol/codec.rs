//! JSON codec for chat messages.
//!
//! Wire format: one UTF-8 JSON object per WebSocket frame.
//!
//! ```text
//! {"email":"<string>","username":"<string>","message":"<string>"}
//! ```
//!
//! Decoding is strict about the three required fields and lenient about
//! everything else: unknown fields are ignored and `"body"` is accepted in
//! place of `"message"`.

use thiserror::Error;
use tracing::trace;

use crate::protocol::messages::ChatMessage;

/// Errors that can occur during message encoding or decoding.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The payload is not valid UTF-8.
    #[error("payload is not valid UTF-8")]
    InvalidUtf8,

    /// The payload is not valid JSON, is not an object, or is missing a
    /// required field.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The message could not be serialized.
    #[error("failed to encode message: {0}")]
    Encode(String),
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a [`ChatMessage`] into its JSON wire representation.
///
/// # Errors
///
/// Returns [`ProtocolError::Encode`] if serialization fails.  With plain
/// string fields this does not happen in practice, but the error is surfaced
/// rather than hidden.
///
/// # Examples
///
/// ```rust
/// use chat_core::{decode_message, encode_message, ChatMessage};
///
/// let msg = ChatMessage::new("a@x.com", "alice", "hi");
/// let text = encode_message(&msg).unwrap();
/// assert_eq!(decode_message(&text).unwrap(), msg);
/// ```
pub fn encode_message(msg: &ChatMessage) -> Result<String, ProtocolError> {
    serde_json::to_string(msg).map_err(|e| ProtocolError::Encode(e.to_string()))
}

/// Decodes one [`ChatMessage`] from a JSON text payload.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedPayload`] if the text is not a JSON
/// object carrying string fields `email`, `username` and `message` (or
/// `body`).
///
/// # Examples
///
/// ```rust
/// use chat_core::decode_message;
///
/// let msg = decode_message(r#"{"email":"a@x.com","username":"alice","message":"hi","color":"red"}"#)
///     .unwrap();
/// assert_eq!(msg.body(), "hi");
///
/// assert!(decode_message(r#"{"email":"a@x.com","username":"alice"}"#).is_err());
/// ```
pub fn decode_message(text: &str) -> Result<ChatMessage, ProtocolError> {
    serde_json::from_str(text).map_err(|e| {
        trace!("chat message decode failed: {e}");
        ProtocolError::MalformedPayload(e.to_string())
    })
}

/// Decodes one [`ChatMessage`] from a raw byte payload (e.g. a binary frame).
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidUtf8`] if the bytes are not UTF-8, or
/// [`ProtocolError::MalformedPayload`] as for [`decode_message`].
pub fn decode_message_slice(bytes: &[u8]) -> Result<ChatMessage, ProtocolError> {
    let text = std::str::from_utf8(bytes).map_err(|_| ProtocolError::InvalidUtf8)?;
    decode_message(text)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_uses_named_fields() {
        // Arrange
        let msg = ChatMessage::new("a@x.com", "alice", "hi");

        // Act
        let text = encode_message(&msg).unwrap();

        // Assert: field order is the struct order; names are explicit.
        assert_eq!(
            text,
            r#"{"email":"a@x.com","username":"alice","message":"hi"}"#
        );
    }

    #[test]
    fn test_decode_accepts_body_alias() {
        let msg = decode_message(r#"{"email":"e","username":"u","body":"b"}"#).unwrap();
        assert_eq!(msg.body(), "b");
    }

    #[test]
    fn test_decode_ignores_unknown_fields() {
        let msg = decode_message(
            r#"{"email":"e","username":"u","message":"m","sent_at":12345,"extra":{"x":1}}"#,
        )
        .unwrap();
        assert_eq!(msg, ChatMessage::new("e", "u", "m"));
    }

    #[test]
    fn test_decode_missing_email_is_malformed() {
        let result = decode_message(r#"{"username":"u","message":"m"}"#);
        assert!(matches!(result, Err(ProtocolError::MalformedPayload(_))));
    }

    #[test]
    fn test_decode_missing_username_is_malformed() {
        let result = decode_message(r#"{"email":"e","message":"m"}"#);
        assert!(matches!(result, Err(ProtocolError::MalformedPayload(_))));
    }

    #[test]
    fn test_decode_missing_text_is_malformed() {
        let result = decode_message(r#"{"email":"e","username":"u"}"#);
        assert!(matches!(result, Err(ProtocolError::MalformedPayload(_))));
    }

    #[test]
    fn test_decode_wrong_field_type_is_malformed() {
        let result = decode_message(r#"{"email":"e","username":"u","message":42}"#);
        assert!(matches!(result, Err(ProtocolError::MalformedPayload(_))));
    }

    #[test]
    fn test_decode_non_object_is_malformed() {
        assert!(decode_message(r#"["e","u","m"]"#).is_err());
        assert!(decode_message("hello").is_err());
        assert!(decode_message("").is_err());
    }

    #[test]
    fn test_decode_slice_rejects_invalid_utf8() {
        let result = decode_message_slice(&[0xFF, 0xFE, 0x00]);
        assert_eq!(result, Err(ProtocolError::InvalidUtf8));
    }

    #[test]
    fn test_decode_slice_accepts_json_bytes() {
        let bytes = br#"{"email":"e","username":"u","message":"m"}"#;
        let msg = decode_message_slice(bytes).unwrap();
        assert_eq!(msg.username(), "u");
    }
}
