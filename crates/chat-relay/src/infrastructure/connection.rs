//! Per-connection plumbing: the WebSocket write half as a [`MessageSink`],
//! and the reader task that turns inbound frames into queued messages.
//!
//! After the upgrade the WebSocket stream is split in two:
//!
//! - the write half goes into a [`WsSink`], which is registered in the
//!   [`ConnectionRegistry`] and written to only by the dispatcher;
//! - the read half is owned by exactly one [`ConnectionReader`].
//!
//! The reader is the one place a connection's lifecycle is driven from:
//! when it stops, for whatever reason, it deregisters the connection.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tracing::{debug, warn};

use chat_core::{decode_message, decode_message_slice, ChatMessage, ProtocolError};

use crate::application::inbound_queue::{EnqueueError, InboundSender};
use crate::application::registry::ConnectionRegistry;
use crate::application::sink::{MessageSink, RelayError};
use crate::domain::config::MalformedPolicy;
use crate::domain::connection::{CloseReason, ConnectionId, ConnectionState, InboundMessage};

// ── Write side ────────────────────────────────────────────────────────────────

/// The write half of one WebSocket connection.
///
/// Wrapped in an async `Mutex` so a close issued by the reader task cannot
/// interleave with a frame being written by the dispatcher.
pub struct WsSink<Si> {
    sink: Mutex<Si>,
    close_timeout: Duration,
}

impl<Si> WsSink<Si> {
    /// Wraps a WebSocket write half.  `close_timeout` bounds [`MessageSink::close`].
    pub fn new(sink: Si, close_timeout: Duration) -> Self {
        Self {
            sink: Mutex::new(sink),
            close_timeout,
        }
    }
}

#[async_trait]
impl<Si> MessageSink for WsSink<Si>
where
    Si: Sink<WsMessage, Error = WsError> + Unpin + Send,
{
    async fn send_text(&self, text: &str) -> Result<(), RelayError> {
        let mut sink = self.sink.lock().await;
        sink.send(WsMessage::Text(text.to_owned()))
            .await
            .map_err(map_ws_error)
    }

    async fn close(&self) {
        // `close` sends a Close frame and flushes.  A peer that stopped
        // reading must not hold the caller here.
        let closing = async {
            let mut sink = self.sink.lock().await;
            if let Err(e) = sink.close().await {
                debug!("WebSocket close: {e}");
            }
        };
        if timeout(self.close_timeout, closing).await.is_err() {
            debug!("WebSocket close timed out after {:?}", self.close_timeout);
        }
    }
}

fn map_ws_error(e: WsError) -> RelayError {
    match e {
        WsError::ConnectionClosed | WsError::AlreadyClosed => RelayError::Closed,
        other => RelayError::Transport(other.to_string()),
    }
}

// ── Read side ─────────────────────────────────────────────────────────────────

/// The reader task for one connection.
///
/// ```text
/// Open ──(receive → decode → enqueue)*──▶ Closed ──▶ deregister
/// ```
///
/// Generic over the frame stream so tests can drive it without a socket.
pub struct ConnectionReader<St> {
    id: ConnectionId,
    frames: St,
    queue: InboundSender,
    registry: Arc<ConnectionRegistry>,
    malformed_policy: MalformedPolicy,
    state: ConnectionState,
}

impl<St> ConnectionReader<St>
where
    St: Stream<Item = Result<WsMessage, WsError>> + Unpin,
{
    /// Creates a reader for connection `id` consuming `frames`.
    pub fn new(
        id: ConnectionId,
        frames: St,
        queue: InboundSender,
        registry: Arc<ConnectionRegistry>,
        malformed_policy: MalformedPolicy,
    ) -> Self {
        Self {
            id,
            frames,
            queue,
            registry,
            malformed_policy,
            state: ConnectionState::Open,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Reads, decodes and enqueues until the connection closes, then
    /// deregisters it.  Returns why it closed.
    pub async fn run(mut self) -> CloseReason {
        let reason = loop {
            let message = match self.receive().await {
                Ok(message) => message,
                Err(reason) => break reason,
            };

            debug!(
                "connection {}: received {} bytes of chat text",
                self.id,
                message.text_len()
            );

            // No registry lock is held here: enqueue may wait under `block`.
            match self.queue.enqueue(InboundMessage::new(self.id, message)).await {
                Ok(()) => {}
                Err(EnqueueError::Full) => {
                    warn!(
                        "connection {}: inbound queue full, message dropped ({} dropped so far)",
                        self.id,
                        self.queue.dropped()
                    );
                }
                Err(EnqueueError::Closed) => break CloseReason::QueueClosed,
            }
        };

        self.state = ConnectionState::Closed(reason.clone());
        self.registry.remove_and_close(self.id).await;
        reason
    }

    /// Waits for the next chat message from the peer.
    ///
    /// Control frames are consumed silently.  Under [`MalformedPolicy::Skip`]
    /// frames that do not decode are logged and skipped; under
    /// [`MalformedPolicy::Close`] they end the connection.
    pub async fn receive(&mut self) -> Result<ChatMessage, CloseReason> {
        loop {
            let frame = match self.frames.next().await {
                Some(Ok(frame)) => frame,
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) | None => {
                    return Err(CloseReason::PeerClosed);
                }
                Some(Err(e)) => return Err(CloseReason::Transport(e.to_string())),
            };

            let decoded = match frame {
                WsMessage::Text(text) => decode_message(&text),
                WsMessage::Binary(bytes) => decode_message_slice(&bytes),
                WsMessage::Close(_) => return Err(CloseReason::PeerClosed),
                // Pings are answered by tungstenite itself.
                WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => continue,
            };

            match decoded {
                Ok(message) => return Ok(message),
                Err(e) => self.on_malformed(e)?,
            }
        }
    }

    fn on_malformed(&self, e: ProtocolError) -> Result<(), CloseReason> {
        match self.malformed_policy {
            MalformedPolicy::Close => Err(CloseReason::Malformed(e.to_string())),
            MalformedPolicy::Skip => {
                warn!("connection {}: skipping malformed message: {e}", self.id);
                Ok(())
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use futures_util::stream;

    use super::*;
    use crate::application::inbound_queue::{inbound_queue, InboundReceiver};
    use crate::application::registry::ConnectionHandle;
    use crate::application::sink::MockMessageSink;
    use crate::domain::config::OverflowPolicy;

    type Frames = stream::Iter<std::vec::IntoIter<Result<WsMessage, WsError>>>;

    fn text(json: &str) -> Result<WsMessage, WsError> {
        Ok(WsMessage::Text(json.to_string()))
    }

    fn chat(body: &str) -> Result<WsMessage, WsError> {
        text(&format!(
            r#"{{"email":"a@x.com","username":"alice","message":"{body}"}}"#
        ))
    }

    struct Fixture {
        id: ConnectionId,
        registry: Arc<ConnectionRegistry>,
        rx: InboundReceiver,
        reader: ConnectionReader<Frames>,
    }

    /// Builds a registered connection whose reader consumes `frames`.  The
    /// connection's sink expects to be closed exactly once.
    async fn fixture(
        frames: Vec<Result<WsMessage, WsError>>,
        policy: MalformedPolicy,
        capacity: usize,
        overflow: OverflowPolicy,
    ) -> Fixture {
        let registry = Arc::new(ConnectionRegistry::new());
        let id = ConnectionId::new();
        let mut sink = MockMessageSink::new();
        sink.expect_close().times(1).return_const(());
        registry.add(ConnectionHandle::new(id, Arc::new(sink))).await;
        let (tx, rx) = inbound_queue(capacity, overflow);
        let reader = ConnectionReader::new(
            id,
            stream::iter(frames),
            tx,
            Arc::clone(&registry),
            policy,
        );
        Fixture {
            id,
            registry,
            rx,
            reader,
        }
    }

    async fn drain(rx: &mut InboundReceiver) -> Vec<String> {
        let mut bodies = Vec::new();
        while let Some(inbound) = rx.recv().await {
            bodies.push(inbound.message.body().to_string());
        }
        bodies
    }

    #[tokio::test]
    async fn test_reader_enqueues_messages_in_order_then_deregisters() {
        // Arrange
        let mut f = fixture(
            vec![chat("one"), chat("two")],
            MalformedPolicy::Close,
            8,
            OverflowPolicy::Block,
        )
        .await;
        assert!(f.reader.state().is_open());

        // Act: the stream ends after two frames.
        let reason = f.reader.run().await;

        // Assert
        assert_eq!(reason, CloseReason::PeerClosed);
        assert!(!f.registry.contains(f.id).await);
        assert_eq!(drain(&mut f.rx).await, ["one", "two"]);
    }

    #[tokio::test]
    async fn test_reader_tags_messages_with_origin() {
        let mut f = fixture(vec![chat("tagged")], MalformedPolicy::Close, 8, OverflowPolicy::Block)
            .await;
        let id = f.id;

        f.reader.run().await;

        let inbound = f.rx.recv().await.unwrap();
        assert_eq!(inbound.origin, id);
    }

    #[tokio::test]
    async fn test_malformed_frame_closes_under_close_policy() {
        // Arrange: the frame after the malformed one must never be enqueued.
        let mut f = fixture(
            vec![chat("ok"), text(r#"{"email":"a@x.com"}"#), chat("never")],
            MalformedPolicy::Close,
            8,
            OverflowPolicy::Block,
        )
        .await;

        // Act
        let reason = f.reader.run().await;

        // Assert
        assert!(matches!(reason, CloseReason::Malformed(_)));
        assert!(!f.registry.contains(f.id).await);
        assert_eq!(drain(&mut f.rx).await, ["ok"]);
    }

    #[tokio::test]
    async fn test_malformed_frame_skipped_under_skip_policy() {
        let mut f = fixture(
            vec![chat("before"), text("not json"), chat("after")],
            MalformedPolicy::Skip,
            8,
            OverflowPolicy::Block,
        )
        .await;

        let reason = f.reader.run().await;

        assert_eq!(reason, CloseReason::PeerClosed);
        assert_eq!(drain(&mut f.rx).await, ["before", "after"]);
    }

    #[tokio::test]
    async fn test_binary_frame_is_decoded_as_json() {
        let payload = br#"{"email":"b@x.com","username":"bob","message":"bin"}"#.to_vec();
        let mut f = fixture(
            vec![Ok(WsMessage::Binary(payload))],
            MalformedPolicy::Close,
            8,
            OverflowPolicy::Block,
        )
        .await;

        f.reader.run().await;

        assert_eq!(drain(&mut f.rx).await, ["bin"]);
    }

    #[tokio::test]
    async fn test_control_frames_are_ignored() {
        let mut f = fixture(
            vec![
                Ok(WsMessage::Ping(vec![1, 2])),
                chat("through"),
                Ok(WsMessage::Pong(Vec::new())),
            ],
            MalformedPolicy::Close,
            8,
            OverflowPolicy::Block,
        )
        .await;

        let reason = f.reader.run().await;

        assert_eq!(reason, CloseReason::PeerClosed);
        assert_eq!(drain(&mut f.rx).await, ["through"]);
    }

    #[tokio::test]
    async fn test_close_frame_stops_reading() {
        let mut f = fixture(
            vec![Ok(WsMessage::Close(None)), chat("after close")],
            MalformedPolicy::Close,
            8,
            OverflowPolicy::Block,
        )
        .await;

        let reason = f.reader.run().await;

        assert_eq!(reason, CloseReason::PeerClosed);
        assert!(drain(&mut f.rx).await.is_empty());
    }

    #[tokio::test]
    async fn test_transport_error_closes_connection() {
        let mut f = fixture(
            vec![
                chat("first"),
                Err(WsError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "reset",
                ))),
                chat("never"),
            ],
            MalformedPolicy::Close,
            8,
            OverflowPolicy::Block,
        )
        .await;

        let reason = f.reader.run().await;

        assert!(matches!(reason, CloseReason::Transport(_)));
        assert!(!f.registry.contains(f.id).await);
        assert_eq!(drain(&mut f.rx).await, ["first"]);
    }

    #[tokio::test]
    async fn test_full_queue_under_reject_drops_and_continues() {
        // Capacity 1 and nobody draining: the second message is rejected, the
        // reader keeps going and still deregisters cleanly at end of stream.
        let mut f = fixture(
            vec![chat("kept"), chat("dropped")],
            MalformedPolicy::Close,
            1,
            OverflowPolicy::Reject,
        )
        .await;

        let reason = f.reader.run().await;

        assert_eq!(reason, CloseReason::PeerClosed);
        assert_eq!(f.rx.dropped(), 1);
        assert_eq!(drain(&mut f.rx).await, ["kept"]);
    }

    #[tokio::test]
    async fn test_closed_queue_stops_reader() {
        let f = fixture(vec![chat("orphan")], MalformedPolicy::Close, 8, OverflowPolicy::Block)
            .await;
        let Fixture {
            id,
            registry,
            rx,
            reader,
        } = f;
        drop(rx);

        let reason = reader.run().await;

        assert_eq!(reason, CloseReason::QueueClosed);
        assert!(!registry.contains(id).await);
    }

    #[tokio::test]
    async fn test_reader_after_dispatcher_removed_connection_does_not_close_twice() {
        // The dispatcher already dropped this connection; the reader's own
        // deregistration must be a no-op (the mock allows one close only).
        let mut f = fixture(vec![chat("x")], MalformedPolicy::Close, 8, OverflowPolicy::Block).await;
        assert!(f.registry.remove_and_close(f.id).await);

        f.reader.run().await;

        assert!(f.registry.is_empty().await);
        assert_eq!(drain(&mut f.rx).await, ["x"]);
    }
}
