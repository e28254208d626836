//! The inbound queue: an ordered, bounded channel from every reader task to
//! the single dispatcher.
//!
//! Multiple producers (one per connection), one consumer.  Messages leave the
//! queue in the order they entered it; that order is the global delivery
//! order.
//!
//! # Overflow policy
//!
//! The queue is bounded so that a burst of messages cannot grow memory
//! without limit.  What happens when it is full is explicit:
//!
//! | Policy   | Producer behaviour when full                              |
//! |----------|-----------------------------------------------------------|
//! | `block`  | waits until the dispatcher frees a slot                   |
//! | `reject` | drops the new message, counts it, returns `Full`          |
//!
//! Neither policy touches messages already queued.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::domain::config::OverflowPolicy;
use crate::domain::connection::InboundMessage;

/// Errors returned by [`InboundSender::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EnqueueError {
    /// The queue was full under the `reject` policy; the message was dropped.
    #[error("inbound queue is full; message dropped")]
    Full,

    /// The dispatcher side has gone away (server shutting down).
    #[error("inbound queue is closed")]
    Closed,
}

/// Creates a bounded inbound queue.
///
/// `capacity` must be at least 1 (checked by `RelayConfig::validate`).
pub fn inbound_queue(capacity: usize, policy: OverflowPolicy) -> (InboundSender, InboundReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    (
        InboundSender {
            tx,
            policy,
            dropped: Arc::clone(&dropped),
        },
        InboundReceiver { rx, dropped },
    )
}

/// Producer side, cloned into every reader task.
#[derive(Debug, Clone)]
pub struct InboundSender {
    tx: mpsc::Sender<InboundMessage>,
    policy: OverflowPolicy,
    dropped: Arc<AtomicU64>,
}

impl InboundSender {
    /// Appends `message` to the queue according to the overflow policy.
    ///
    /// # Errors
    ///
    /// - [`EnqueueError::Full`] under `reject` when no slot is free.
    /// - [`EnqueueError::Closed`] when the receiver has been dropped.
    pub async fn enqueue(&self, message: InboundMessage) -> Result<(), EnqueueError> {
        match self.policy {
            OverflowPolicy::Block => self
                .tx
                .send(message)
                .await
                .map_err(|_| EnqueueError::Closed),
            OverflowPolicy::Reject => match self.tx.try_send(message) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    Err(EnqueueError::Full)
                }
                Err(TrySendError::Closed(_)) => Err(EnqueueError::Closed),
            },
        }
    }

    /// The overflow policy this sender applies.
    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Number of messages dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Consumer side, owned by the dispatcher.
#[derive(Debug)]
pub struct InboundReceiver {
    rx: mpsc::Receiver<InboundMessage>,
    dropped: Arc<AtomicU64>,
}

impl InboundReceiver {
    /// Waits for the next message.
    ///
    /// Returns `None` once every sender has been dropped and the queue has
    /// been fully drained.
    pub async fn recv(&mut self) -> Option<InboundMessage> {
        self.rx.recv().await
    }

    /// Number of messages dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chat_core::ChatMessage;
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::domain::connection::ConnectionId;

    fn inbound(body: &str) -> InboundMessage {
        InboundMessage::new(
            ConnectionId::new(),
            ChatMessage::new("a@x.com", "alice", body),
        )
    }

    #[tokio::test]
    async fn test_messages_leave_in_fifo_order() {
        // Arrange
        let (tx, mut rx) = inbound_queue(8, OverflowPolicy::Block);

        // Act
        for body in ["one", "two", "three"] {
            assert_ok!(tx.enqueue(inbound(body)).await);
        }
        drop(tx);

        // Assert
        let mut bodies = Vec::new();
        while let Some(msg) = rx.recv().await {
            bodies.push(msg.message.body().to_string());
        }
        assert_eq!(bodies, ["one", "two", "three"]);
    }

    #[tokio::test]
    async fn test_block_policy_waits_for_space() {
        // Arrange: capacity 1, already full.
        let (tx, mut rx) = inbound_queue(1, OverflowPolicy::Block);
        assert_ok!(tx.enqueue(inbound("first")).await);

        // Act: the second enqueue must not complete while the queue is full.
        let blocked = tokio::time::timeout(Duration::from_millis(50), tx.enqueue(inbound("second")))
            .await;
        assert!(blocked.is_err(), "enqueue must wait while the queue is full");

        // Freeing a slot lets the producer through.
        assert_eq!(rx.recv().await.unwrap().message.body(), "first");
        assert_ok!(tx.enqueue(inbound("third")).await);

        // Assert: nothing was dropped and queue contents are intact.
        assert_eq!(rx.recv().await.unwrap().message.body(), "third");
        assert_eq!(tx.dropped(), 0);
    }

    #[tokio::test]
    async fn test_reject_policy_drops_newest_and_counts() {
        // Arrange
        let (tx, mut rx) = inbound_queue(2, OverflowPolicy::Reject);
        assert_ok!(tx.enqueue(inbound("a")).await);
        assert_ok!(tx.enqueue(inbound("b")).await);

        // Act
        let result = tx.enqueue(inbound("c")).await;

        // Assert: the new message was rejected, the queued ones kept in order.
        assert_eq!(result, Err(EnqueueError::Full));
        assert_eq!(tx.dropped(), 1);
        assert_eq!(rx.dropped(), 1);
        assert_eq!(rx.recv().await.unwrap().message.body(), "a");
        assert_eq!(rx.recv().await.unwrap().message.body(), "b");

        // Space is available again.
        assert_ok!(tx.enqueue(inbound("d")).await);
        assert_eq!(rx.recv().await.unwrap().message.body(), "d");
    }

    #[tokio::test]
    async fn test_enqueue_after_receiver_dropped_is_closed() {
        for policy in [OverflowPolicy::Block, OverflowPolicy::Reject] {
            let (tx, rx) = inbound_queue(4, policy);
            drop(rx);
            let result = tx.enqueue(inbound("late")).await;
            assert_err!(&result);
            assert_eq!(result, Err(EnqueueError::Closed));
        }
    }

    #[tokio::test]
    async fn test_recv_drains_queue_after_senders_dropped() {
        // Messages queued before shutdown are still delivered.
        let (tx, mut rx) = inbound_queue(4, OverflowPolicy::Block);
        let tx2 = tx.clone();
        assert_ok!(tx.enqueue(inbound("x")).await);
        assert_ok!(tx2.enqueue(inbound("y")).await);
        drop(tx);
        drop(tx2);

        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_sender_reports_policy() {
        let (tx, _rx) = inbound_queue(1, OverflowPolicy::Reject);
        assert_eq!(tx.policy(), OverflowPolicy::Reject);
    }
}
