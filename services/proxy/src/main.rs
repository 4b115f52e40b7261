//! relay-proxy
//!
//! Transparent TCP forwarding proxy on a single-threaded readiness loop.
//!
//! This service:
//! - Accepts TCP connections on one listening port
//! - Opens a matching connection to a fixed backend per inbound connection
//! - Relays bytes in both directions, one buffered chunk per direction

use std::sync::atomic::Ordering;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use relay_proxy::config::{Cli, Config};
use relay_proxy::Listener;

fn init_tracing(config: &Config) {
    // Prefer RUST_LOG, fall back to the --debug derived level.
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into());
    let registry = tracing_subscriber::registry().with(filter);

    if config.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn main() -> Result<()> {
    let config = Cli::parse().into_config();
    init_tracing(&config);

    info!("Starting relay-proxy");
    info!(
        bind_addr = %config.listener.bind_addr,
        backend = %config.listener.backend,
        recv_block = config.listener.options.recv_block,
        max_connections = config.listener.options.max_connections,
        "Configuration loaded"
    );

    let bind_addr = config.listener.bind_addr;
    let listener = Listener::bind(config.listener)
        .with_context(|| format!("failed to bind listener on {}", bind_addr))?;
    let context = listener.context();

    listener.run().context("dispatch loop failed")?;

    let stats = &context.stats;
    info!(
        connections_accepted = stats.connections_accepted.load(Ordering::Relaxed),
        connections_closed = stats.connections_closed.load(Ordering::Relaxed),
        bytes_to_backend = stats.bytes_to_backend.load(Ordering::Relaxed),
        bytes_from_backend = stats.bytes_from_backend.load(Ordering::Relaxed),
        "Dispatch loop finished"
    );
    Ok(())
}
