//! chat-relay library crate.
//!
//! A real-time chat relay: clients connect over WebSocket, submit chat
//! messages, and receive every message submitted by any connected client in
//! the order the server observed them.
//!
//! # Architecture
//!
//! ```text
//! Browser ──JSON/WebSocket──▶ reader task ──▶ inbound queue ──▶ dispatcher
//!    ▲                          (one per        (bounded,        (one per
//!    │                          connection)     FIFO)            process)
//!    └────────────────────── connection registry ◀────────────────┘
//!                              snapshot + fanout
//! ```
//!
//! - `domain/`          Pure types: `RelayConfig`, `ConnectionId`, envelopes
//! - `application/`     Registry, inbound queue, dispatcher, `MessageSink` seam
//! - `infrastructure/`  WebSocket accept loop, per-connection reader task,
//!                      WebSocket sink, TOML config file loader
//!
//! # Layer rules
//!
//! - `domain` has no I/O and no async.
//! - `application` depends on `domain` and `chat-core`, and talks to
//!   connections only through the [`application::MessageSink`] trait.
//! - `infrastructure` depends on all other layers plus `tungstenite`.

/// Domain layer: configuration and identity types (no I/O).
pub mod domain;

/// Application layer: connection registry and fanout engine.
pub mod application;

/// Infrastructure layer: WebSocket server and connection tasks.
pub mod infrastructure;
