//! Infrastructure layer for chat-relay.
//!
//! Handles all I/O: accepting TCP connections, the WebSocket upgrade,
//! reading and writing WebSocket frames, and loading the config file.
//!
//! # What does NOT belong here?
//!
//! - Fanout and registry logic (that is the application layer)
//! - Configuration types (that is the domain layer)

pub mod config_file;
pub mod connection;
pub mod ws_server;

pub use config_file::{load_config, ConfigError, RelayFileConfig};
pub use ws_server::{run_server, RelayServer};
