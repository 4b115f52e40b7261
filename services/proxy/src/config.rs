//! Proxy configuration.
//!
//! Everything comes from the command line; each flag can also be supplied
//! through the environment variable named in its help text.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use clap::Parser;

use crate::proxy::{
    Backend, ListenerConfig, RelayOptions, DEFAULT_ACCEPT_BACKOFF, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_MAX_CONNECTIONS, DEFAULT_RECV_BLOCK,
};

/// Default backend host.
pub const DEFAULT_SERVER: &str = "www.deadcoderssociety.net";

/// Default backend port.
pub const DEFAULT_PORT: u16 = 443;

/// Default readiness wait timeout in milliseconds.
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 10_000;

/// relay-proxy - forward every inbound TCP connection to a fixed backend.
#[derive(Debug, Parser)]
#[command(name = "relay-proxy")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Port number to listen to incoming connections.
    #[arg(env = "RELAY_LISTEN_PORT")]
    pub listen_port: u16,

    /// Address to bind the listening socket to.
    #[arg(long, env = "RELAY_BIND", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub bind: IpAddr,

    /// Server FQDN to connect to.
    #[arg(short, long, env = "RELAY_SERVER", default_value = DEFAULT_SERVER)]
    pub server: String,

    /// Server port to connect to.
    #[arg(short, long, env = "RELAY_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Show debug output.
    #[arg(short, long, env = "RELAY_DEBUG")]
    pub debug: bool,

    /// Maximum concurrent relayed connections.
    #[arg(long, env = "RELAY_MAX_CONNECTIONS", default_value_t = DEFAULT_MAX_CONNECTIONS)]
    pub max_connections: usize,

    /// Upper bound in bytes for a single read.
    #[arg(long, env = "RELAY_RECV_BLOCK", default_value_t = DEFAULT_RECV_BLOCK)]
    pub recv_block: usize,

    /// Backend connect timeout in milliseconds.
    #[arg(long, env = "RELAY_CONNECT_TIMEOUT_MS", default_value_t = DEFAULT_CONNECT_TIMEOUT.as_millis() as u64)]
    pub connect_timeout_ms: u64,

    /// Pause in milliseconds after a persistent accept error.
    #[arg(long, env = "RELAY_ACCEPT_BACKOFF_MS", default_value_t = DEFAULT_ACCEPT_BACKOFF.as_millis() as u64)]
    pub accept_backoff_ms: u64,

    /// Readiness wait timeout in milliseconds.
    #[arg(long, env = "RELAY_POLL_TIMEOUT_MS", default_value_t = DEFAULT_POLL_TIMEOUT_MS)]
    pub poll_timeout_ms: u64,

    /// Emit logs as JSON.
    #[arg(long, env = "RELAY_LOG_JSON")]
    pub log_json: bool,
}

/// Resolved proxy configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listener and relay settings.
    pub listener: ListenerConfig,

    /// Log level used when `RUST_LOG` is not set (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit logs as JSON.
    pub log_json: bool,
}

impl Cli {
    /// Turn parsed arguments into a configuration, clamping out-of-range values.
    pub fn into_config(self) -> Config {
        let bind_addr = SocketAddr::new(self.bind, self.listen_port);
        let backend = Backend::new(self.server, self.port);

        let mut listener = ListenerConfig::new(bind_addr, backend);
        listener.options = RelayOptions {
            recv_block: self.recv_block.max(1),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms.max(1)),
            max_connections: self.max_connections,
            accept_backoff: Duration::from_millis(self.accept_backoff_ms),
        };
        listener.poll_timeout = Duration::from_millis(self.poll_timeout_ms.max(1));

        let log_level = if self.debug { "debug" } else { "info" }.to_string();

        Config {
            listener,
            log_level,
            log_json: self.log_json,
        }
    }
}
