//! Dispatcher: the single task that drains the inbound queue and fans each
//! message out to every registered connection.
//!
//! # Fanout
//!
//! For each dequeued message the dispatcher:
//!
//! 1. encodes it once,
//! 2. takes a registry snapshot (the lock is released before any write),
//! 3. sends to every recipient in the snapshot concurrently, each send
//!    bounded by `write_timeout`,
//! 4. deregisters every recipient whose send failed or timed out, then
//!    closes all of them concurrently.
//!
//! The next message is not dispatched until every send of the current one has
//! finished, so each recipient sees messages in dequeue order.  Stalled peers
//! delay the others by at most one `write_timeout` for the sends plus one
//! close timeout, however many of them there are.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use chat_core::encode_message;

use crate::application::inbound_queue::InboundReceiver;
use crate::application::registry::{ConnectionHandle, ConnectionRegistry};
use crate::application::sink::RelayError;
use crate::domain::config::RelayConfig;
use crate::domain::connection::{ConnectionId, InboundMessage};

/// Outcome of delivering one message.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FanoutReport {
    /// Recipients that accepted the frame.
    pub delivered: usize,
    /// Recipients whose send failed or timed out; all have been deregistered.
    pub failed: Vec<ConnectionId>,
}

/// Totals over the dispatcher's lifetime, returned when it stops.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Messages dequeued and fanned out.
    pub messages: u64,
    /// Successful per-recipient deliveries.
    pub deliveries: u64,
    /// Recipients dropped because a send failed or timed out.
    pub failures: u64,
    /// Messages rejected by a full queue before reaching the dispatcher.
    pub dropped_on_enqueue: u64,
}

/// Drains the inbound queue and performs fanout.
pub struct Dispatcher {
    registry: Arc<ConnectionRegistry>,
    queue: InboundReceiver,
    write_timeout: Duration,
    echo_to_sender: bool,
}

impl Dispatcher {
    /// Creates a dispatcher over `registry` consuming from `queue`.
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        queue: InboundReceiver,
        write_timeout: Duration,
        echo_to_sender: bool,
    ) -> Self {
        Self {
            registry,
            queue,
            write_timeout,
            echo_to_sender,
        }
    }

    /// Creates a dispatcher using the timeout and echo settings of `config`.
    pub fn from_config(
        registry: Arc<ConnectionRegistry>,
        queue: InboundReceiver,
        config: &RelayConfig,
    ) -> Self {
        Self::new(registry, queue, config.write_timeout, config.echo_to_sender)
    }

    /// Runs until the queue is closed and empty.
    ///
    /// Every message still queued when the last sender is dropped is
    /// delivered before this returns.
    pub async fn run(mut self) -> DispatchSummary {
        info!(
            "dispatcher started (write_timeout={:?}, echo_to_sender={})",
            self.write_timeout, self.echo_to_sender
        );

        let mut summary = DispatchSummary::default();
        while let Some(inbound) = self.queue.recv().await {
            let report = self.fanout(&inbound).await;
            summary.messages += 1;
            summary.deliveries += report.delivered as u64;
            summary.failures += report.failed.len() as u64;
        }
        summary.dropped_on_enqueue = self.queue.dropped();

        info!(
            "dispatcher stopped: {} messages, {} deliveries, {} failed recipients, {} dropped on enqueue",
            summary.messages, summary.deliveries, summary.failures, summary.dropped_on_enqueue
        );
        summary
    }

    /// Delivers one message to every connection currently registered.
    ///
    /// Never fails as a whole: per-recipient failures are recorded in the
    /// report and the failing recipients are deregistered.
    pub async fn fanout(&self, inbound: &InboundMessage) -> FanoutReport {
        let text = match encode_message(&inbound.message) {
            Ok(text) => text,
            Err(e) => {
                error!("dropping message from {}: {e}", inbound.origin);
                return FanoutReport::default();
            }
        };

        let recipients: Vec<ConnectionHandle> = self
            .registry
            .snapshot()
            .await
            .into_iter()
            .filter(|handle| self.echo_to_sender || handle.id() != inbound.origin)
            .collect();

        debug!(
            "fanout of {} bytes from {} to {} recipients",
            inbound.message.text_len(),
            inbound.origin,
            recipients.len()
        );

        let sends = recipients.iter().map(|handle| self.send_bounded(handle, &text));
        let results = join_all(sends).await;

        let mut report = FanoutReport::default();
        let mut to_close = Vec::new();
        for (handle, result) in recipients.iter().zip(results) {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!("dropping recipient {}: {e}", handle.id());
                    // A reader that removed it first also closes it.
                    if let Some(removed) = self.registry.remove(handle.id()).await {
                        to_close.push(removed);
                    }
                    report.failed.push(handle.id());
                }
            }
        }

        // Closing flushes a Close frame, which a stalled peer may not accept.
        join_all(to_close.iter().map(|handle| handle.close())).await;
        report
    }

    /// Sends `text` to one recipient, giving up after `write_timeout`.
    async fn send_bounded(&self, handle: &ConnectionHandle, text: &str) -> Result<(), RelayError> {
        match timeout(self.write_timeout, handle.send_text(text)).await {
            Ok(result) => result,
            Err(_) => Err(RelayError::WriteTimeout(self.write_timeout)),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
