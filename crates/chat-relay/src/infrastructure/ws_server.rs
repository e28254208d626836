//! WebSocket server: accept loop, per-connection task management and
//! graceful shutdown.
//!
//! This module is responsible for:
//!
//! 1. Binding a TCP listener on the configured address.
//! 2. Starting the single dispatcher task.
//! 3. Accepting incoming TCP connections and spawning one task per
//!    connection that performs the WebSocket upgrade, registers the
//!    connection and runs its reader.
//! 4. Shutting down when the `running` flag is cleared.
//!
//! # Upgrade failures
//!
//! A failed handshake (malformed request, wrong path, oversized headers) or
//! one not completed within `write_timeout` rejects that one request.  Nothing is registered, no reader runs, and the
//! accept loop carries on.
//!
//! # Shutdown sequence
//!
//! 1. Stop accepting.
//! 2. Abort every connection task, so no reader enqueues anything more.
//! 3. Drop the server's queue sender; the dispatcher delivers every message
//!    still queued to the connections still registered, then stops.
//! 4. Drain the registry and send each remaining connection a Close frame.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use futures_util::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_tungstenite::accept_hdr_async_with_config;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tracing::{debug, error, info, warn};

use crate::application::dispatcher::{DispatchSummary, Dispatcher};
use crate::application::inbound_queue::{inbound_queue, InboundSender};
use crate::application::registry::{ConnectionHandle, ConnectionRegistry};
use crate::domain::config::RelayConfig;
use crate::domain::connection::{CloseReason, ConnectionId};
use crate::infrastructure::connection::{ConnectionReader, WsSink};

/// How often the accept loop wakes up to check the `running` flag.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(200);

// ── Public API ────────────────────────────────────────────────────────────────

/// Binds the listener described by `config` and serves until `running` is
/// set to `false`.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the listener cannot
/// be bound (port in use, missing permission).
pub async fn run_server(
    config: RelayConfig,
    running: Arc<AtomicBool>,
) -> anyhow::Result<DispatchSummary> {
    RelayServer::bind(config).await?.serve(running).await
}

/// A bound relay that has not started serving yet.
///
/// Splitting bind from serve lets callers learn the actual listening address
/// (e.g. after binding port 0) and reach the registry before serving starts.
pub struct RelayServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: Arc<RelayConfig>,
    registry: Arc<ConnectionRegistry>,
}

impl RelayServer {
    /// Validates `config` and binds its listener.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` fails validation or the bind fails.
    pub async fn bind(config: RelayConfig) -> anyhow::Result<Self> {
        config.validate().context("invalid relay configuration")?;

        let listener = TcpListener::bind(config.bind_addr)
            .await
            .with_context(|| format!("failed to bind WebSocket listener on {}", config.bind_addr))?;
        let local_addr = listener
            .local_addr()
            .context("failed to read bound listener address")?;

        info!("chat relay listening on ws://{local_addr}{}", config.ws_path);

        Ok(Self {
            listener,
            local_addr,
            config: Arc::new(config),
            registry: Arc::new(ConnectionRegistry::new()),
        })
    }

    /// The address the listener is actually bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The registry of live connections.
    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Accepts connections until `running` is cleared, then shuts down.
    ///
    /// Returns the dispatcher's totals.
    ///
    /// # Errors
    ///
    /// Returns an error only if the dispatcher task panicked.
    pub async fn serve(self, running: Arc<AtomicBool>) -> anyhow::Result<DispatchSummary> {
        let Self {
            listener,
            config,
            registry,
            ..
        } = self;

        let (queue_tx, queue_rx) = inbound_queue(config.queue_capacity, config.overflow_policy);
        let dispatcher = Dispatcher::from_config(Arc::clone(&registry), queue_rx, &config);
        let dispatcher_task = tokio::spawn(dispatcher.run());

        let mut connections = JoinSet::new();

        loop {
            if !running.load(Ordering::Relaxed) {
                info!("shutdown flag set; stopping accept loop");
                break;
            }

            // Reap finished connection tasks so the set does not grow forever.
            while connections.try_join_next().is_some() {}

            // A short timeout on `accept()` lets the loop notice the flag even
            // when nobody is connecting.
            match timeout(ACCEPT_POLL_INTERVAL, listener.accept()).await {
                Ok(Ok((stream, peer_addr))) => {
                    debug!("new TCP connection from {peer_addr}");
                    connections.spawn(handle_connection(
                        stream,
                        peer_addr,
                        Arc::clone(&config),
                        Arc::clone(&registry),
                        queue_tx.clone(),
                    ));
                }
                Ok(Err(e)) => {
                    // Transient accept error (e.g. too many open files).
                    error!("accept error: {e}");
                }
                Err(_) => {}
            }
        }

        drop(listener);

        info!(
            "shutting down: {} registered connections, {} connection tasks",
            registry.len().await,
            connections.len()
        );

        connections.abort_all();
        while connections.join_next().await.is_some() {}

        drop(queue_tx);
        let summary = dispatcher_task
            .await
            .context("dispatcher task terminated abnormally")?;

        let remaining = registry.drain().await;
        for handle in &remaining {
            handle.close().await;
        }
        info!("closed {} connections at shutdown", remaining.len());

        Ok(summary)
    }
}

// ── Per-connection handler ────────────────────────────────────────────────────

/// Entry point of each per-connection task.  Logs the outcome.
async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    config: Arc<RelayConfig>,
    registry: Arc<ConnectionRegistry>,
    queue: InboundSender,
) {
    match run_connection(stream, peer_addr, config, registry, queue).await {
        Ok((id, reason)) => info!("connection {id} ({peer_addr}) closed: {reason}"),
        Err(e) => warn!("rejected connection from {peer_addr}: {e:#}"),
    }
}

/// Upgrades, registers and reads one connection until it closes.
///
/// # Errors
///
/// Returns an error if the WebSocket handshake fails.  In that case nothing
/// has been registered.
async fn run_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    config: Arc<RelayConfig>,
    registry: Arc<ConnectionRegistry>,
    queue: InboundSender,
) -> anyhow::Result<(ConnectionId, CloseReason)> {
    let ws_path = config.ws_path.clone();
    let check_path = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        check_upgrade_path(&ws_path, request)?;
        Ok(response)
    };

    // A peer that never completes the handshake must not hold its task.
    let handshake = accept_hdr_async_with_config(
        stream,
        check_path,
        Some(websocket_config(config.max_message_bytes)),
    );
    let ws_stream = timeout(config.write_timeout, handshake)
        .await
        .map_err(|_| {
            anyhow::anyhow!(
                "WebSocket handshake with {peer_addr} timed out after {:?}",
                config.write_timeout
            )
        })?
        .with_context(|| format!("WebSocket handshake failed with {peer_addr}"))?;

    let id = ConnectionId::new();
    let (ws_tx, ws_rx) = ws_stream.split();
    let sink = Arc::new(WsSink::new(ws_tx, config.write_timeout));
    registry.add(ConnectionHandle::new(id, sink)).await;
    info!("connection {id} registered from {peer_addr}");

    let reader = ConnectionReader::new(
        id,
        ws_rx,
        queue,
        Arc::clone(&registry),
        config.malformed_policy,
    );
    Ok((id, reader.run().await))
}

/// Accepts the upgrade only for the configured WebSocket path.
fn check_upgrade_path(expected: &str, request: &Request) -> Result<(), ErrorResponse> {
    if request.uri().path() == expected {
        return Ok(());
    }
    let mut response = ErrorResponse::new(Some(format!(
        "no WebSocket endpoint at {}",
        request.uri().path()
    )));
    *response.status_mut() = StatusCode::NOT_FOUND;
    Err(response)
}

/// WebSocket limits derived from the relay configuration.
fn websocket_config(max_message_bytes: usize) -> WebSocketConfig {
    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(max_message_bytes);
    ws_config.max_frame_size = Some(max_message_bytes);
    ws_config
}

// ── Tests ─────────────────────────────────────────────────────────────────────
