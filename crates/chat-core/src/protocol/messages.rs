//! The chat message exchanged between clients through the relay.

use serde::{Deserialize, Serialize};

/// One chat message as submitted by a client and relayed to every recipient.
///
/// A `ChatMessage` is immutable once constructed: the fields are private and
/// only exposed through accessors.  Duplicates are valid (a client may
/// retransmit the same text), so there is no identity beyond the field values.
///
/// # Serde representation
///
/// ```json
/// {"email":"a@x.com","username":"alice","message":"hi"}
/// ```
///
/// The text field is written as `"message"`.  On decode, `"body"` is accepted
/// as an alias.  All three fields are required.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Sender e-mail address.  Clients use it to look up an avatar from an
    /// external service; it is not an authenticated identity.
    email: String,

    /// Display name chosen by the sender.
    username: String,

    /// Free-form message text.
    #[serde(rename = "message", alias = "body")]
    body: String,
}

impl ChatMessage {
    /// Creates a new message from its three parts.
    ///
    /// # Example
    ///
    /// ```rust
    /// use chat_core::ChatMessage;
    ///
    /// let msg = ChatMessage::new("a@x.com", "alice", "hi");
    /// assert_eq!(msg.username(), "alice");
    /// ```
    pub fn new(
        email: impl Into<String>,
        username: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            email: email.into(),
            username: username.into(),
            body: body.into(),
        }
    }

    /// Sender e-mail address.
    pub fn email(&self) -> &str {
        &self.email
    }

    /// Sender display name.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Message text.
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Total size in bytes of the three text fields.
    ///
    /// Used in debug logs instead of the text itself so message content does
    /// not end up in log files.
    pub fn text_len(&self) -> usize {
        self.email.len() + self.username.len() + self.body.len()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
