//! Chat relay: entry point.
//!
//! Accepts WebSocket connections on a single path and relays every chat
//! message a client sends to all connected clients.
//!
//! # Usage
//!
//! ```text
//! chat-relay [OPTIONS]
//!
//! Options:
//!   --config <FILE>                TOML configuration file
//!   --bind <IP>                    Address to bind [default: 0.0.0.0]
//!   --port <PORT>                  Listener port [default: 8000]
//!   --ws-path <PATH>               WebSocket path [default: /ws]
//!   --queue-capacity <N>           Inbound queue capacity [default: 1024]
//!   --overflow-policy <POLICY>     block | reject [default: block]
//!   --write-timeout-ms <MS>        Per-recipient write timeout [default: 5000]
//!   --echo-to-sender <BOOL>        Echo messages to their sender [default: true]
//!   --malformed-policy <POLICY>    close | skip [default: close]
//!   --max-message-bytes <N>        Largest inbound message [default: 65536]
//!   --log-level <LEVEL>            Log level when RUST_LOG is unset [default: info]
//! ```
//!
//! # Precedence
//!
//! Built-in defaults, then the `--config` file, then environment variables
//! and flags.  Every flag has a `CHAT_RELAY_*` environment variable, e.g.
//! `CHAT_RELAY_PORT` or `CHAT_RELAY_QUEUE_CAPACITY`.  `RUST_LOG`, when set,
//! overrides `--log-level`.

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use chat_relay::domain::{MalformedPolicy, OverflowPolicy, RelayConfig};
use chat_relay::infrastructure::{load_config, run_server, RelayFileConfig};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// WebSocket chat relay.
///
/// Every option is optional.  Anything left unset falls back to the config
/// file and then to the built-in default.
#[derive(Debug, Default, Parser)]
#[command(
    name = "chat-relay",
    about = "Broadcast chat relay over WebSocket",
    version
)]
struct Cli {
    /// TOML configuration file.
    #[arg(long, env = "CHAT_RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// IP address to bind.  `0.0.0.0` accepts connections on every interface.
    #[arg(long, env = "CHAT_RELAY_BIND")]
    bind: Option<IpAddr>,

    /// TCP port to listen on.
    #[arg(long, env = "CHAT_RELAY_PORT")]
    port: Option<u16>,

    /// Request path upgraded to a WebSocket.
    #[arg(long, env = "CHAT_RELAY_WS_PATH")]
    ws_path: Option<String>,

    /// Number of messages the inbound queue holds.
    #[arg(long, env = "CHAT_RELAY_QUEUE_CAPACITY")]
    queue_capacity: Option<usize>,

    /// What readers do when the queue is full: `block` or `reject`.
    #[arg(long, env = "CHAT_RELAY_OVERFLOW_POLICY")]
    overflow_policy: Option<OverflowPolicy>,

    /// Upper bound on one write to one recipient, in milliseconds.
    #[arg(long, env = "CHAT_RELAY_WRITE_TIMEOUT_MS")]
    write_timeout_ms: Option<u64>,

    /// Whether a sender receives its own messages back.
    #[arg(long, env = "CHAT_RELAY_ECHO_TO_SENDER")]
    echo_to_sender: Option<bool>,

    /// What readers do with frames that do not decode: `close` or `skip`.
    #[arg(long, env = "CHAT_RELAY_MALFORMED_POLICY")]
    malformed_policy: Option<MalformedPolicy>,

    /// Largest inbound WebSocket message, in bytes.
    #[arg(long, env = "CHAT_RELAY_MAX_MESSAGE_BYTES")]
    max_message_bytes: Option<usize>,

    /// Log level used when `RUST_LOG` is not set.
    #[arg(long, env = "CHAT_RELAY_LOG_LEVEL")]
    log_level: Option<String>,
}

/// Everything `main` needs once arguments are resolved.
#[derive(Debug)]
struct Settings {
    relay: RelayConfig,
    log_level: String,
}

impl Cli {
    /// Loads the config file (if any) and applies the CLI overrides on top.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed, or if
    /// the merged configuration fails validation.
    fn into_settings(self) -> anyhow::Result<Settings> {
        let file = match &self.config {
            Some(path) => load_config(path)
                .with_context(|| format!("failed to load config file {}", path.display()))?,
            None => RelayFileConfig::default(),
        };
        let mut relay = file
            .to_relay_config()
            .context("invalid values in config file")?;

        if let Some(ip) = self.bind {
            relay.bind_addr.set_ip(ip);
        }
        if let Some(port) = self.port {
            relay.bind_addr.set_port(port);
        }
        if let Some(ws_path) = self.ws_path {
            relay.ws_path = ws_path;
        }
        if let Some(capacity) = self.queue_capacity {
            relay.queue_capacity = capacity;
        }
        if let Some(policy) = self.overflow_policy {
            relay.overflow_policy = policy;
        }
        if let Some(ms) = self.write_timeout_ms {
            relay.write_timeout = Duration::from_millis(ms);
        }
        if let Some(echo) = self.echo_to_sender {
            relay.echo_to_sender = echo;
        }
        if let Some(policy) = self.malformed_policy {
            relay.malformed_policy = policy;
        }
        if let Some(max) = self.max_message_bytes {
            relay.max_message_bytes = max;
        }

        relay.validate().context("invalid relay configuration")?;

        Ok(Settings {
            relay,
            log_level: self.log_level.unwrap_or(file.server.log_level),
        })
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Program entry point.
///
/// 1. Parse arguments and merge them with the config file.
/// 2. Initialise `tracing`; `RUST_LOG` wins over the configured level.
/// 3. Spawn a Ctrl+C handler that clears the shared `running` flag.
/// 4. Serve until the flag is cleared, then log the relay totals.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Cli::parse().into_settings()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&settings.log_level)),
        )
        .init();

    let config = settings.relay;
    info!(
        "chat relay starting: bind={}, path={}, queue={} ({}), write_timeout={:?}, echo={}, malformed={}",
        config.bind_addr,
        config.ws_path,
        config.queue_capacity,
        config.overflow_policy,
        config.write_timeout,
        config.echo_to_sender,
        config.malformed_policy
    );

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);

    // The accept loop polls this flag every 200 ms.
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C; initiating graceful shutdown");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!("failed to listen for Ctrl+C signal: {e}");
            }
        }
    });

    let summary = run_server(config, running).await?;

    info!(
        "chat relay stopped: {} messages, {} deliveries, {} failed writes, {} dropped on enqueue",
        summary.messages, summary.deliveries, summary.failures, summary.dropped_on_enqueue
    );
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_without_arguments_leaves_everything_unset() {
        // Arrange / Act
        let cli = Cli::try_parse_from(["chat-relay"]).unwrap();

        // Assert
        assert!(cli.port.is_none());
        assert!(cli.overflow_policy.is_none());
        assert!(cli.echo_to_sender.is_none());
    }

    #[test]
    fn test_default_settings_match_relay_defaults() {
        let settings = Cli::default().into_settings().unwrap();
        assert_eq!(settings.relay, RelayConfig::default());
        assert_eq!(settings.log_level, "info");
    }

    #[test]
    fn test_cli_port_and_bind_override() {
        let cli = Cli::try_parse_from(["chat-relay", "--bind", "127.0.0.1", "--port", "9999"])
            .unwrap();

        let settings = cli.into_settings().unwrap();

        assert_eq!(settings.relay.bind_addr.to_string(), "127.0.0.1:9999");
    }

    #[test]
    fn test_cli_policies_parse() {
        let cli = Cli::try_parse_from([
            "chat-relay",
            "--overflow-policy",
            "reject",
            "--malformed-policy",
            "skip",
            "--echo-to-sender",
            "false",
        ])
        .unwrap();

        let settings = cli.into_settings().unwrap();

        assert_eq!(settings.relay.overflow_policy, OverflowPolicy::Reject);
        assert_eq!(settings.relay.malformed_policy, MalformedPolicy::Skip);
        assert!(!settings.relay.echo_to_sender);
    }

    #[test]
    fn test_cli_rejects_unknown_policy() {
        let result = Cli::try_parse_from(["chat-relay", "--overflow-policy", "drop"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_rejects_invalid_bind_address() {
        let result = Cli::try_parse_from(["chat-relay", "--bind", "not.an.ip"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_write_timeout_ms_converts_to_duration() {
        let cli = Cli::try_parse_from(["chat-relay", "--write-timeout-ms", "250"]).unwrap();
        let settings = cli.into_settings().unwrap();
        assert_eq!(settings.relay.write_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_zero_queue_capacity_fails_validation() {
        let cli = Cli {
            queue_capacity: Some(0),
            ..Cli::default()
        };
        assert!(cli.into_settings().is_err());
    }

    #[test]
    fn test_oversized_queue_capacity_fails_validation() {
        let capacity = usize::MAX.to_string();
        let cli = Cli::try_parse_from(["chat-relay", "--queue-capacity", capacity.as_str()])
            .unwrap();
        assert!(cli.into_settings().is_err());
    }

    #[test]
    fn test_missing_config_file_is_error() {
        let cli = Cli {
            config: Some(PathBuf::from("/definitely/not/here/relay.toml")),
            ..Cli::default()
        };
        assert!(cli.into_settings().is_err());
    }

    #[test]
    fn test_log_level_override() {
        let cli = Cli {
            log_level: Some("debug".to_string()),
            ..Cli::default()
        };
        assert_eq!(cli.into_settings().unwrap().log_level, "debug");
    }
}
