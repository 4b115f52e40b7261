//! Readiness-driven TCP forwarding.
//!
//! This module provides:
//! - The accept handler (one inbound connection per readiness, one backend
//!   connection per inbound connection)
//! - The non-blocking backend connect, bounded by the connect timeout
//! - The receive and send handlers relaying bytes in both directions
//! - Relay statistics
//!
//! ## Architecture
//!
//! ```text
//! Client -> Listener (Accept) -> Connect (writable | deadline) -> Backend
//!
//! inbound  --Receive--> Send --> outbound     (to backend)
//! outbound --Receive--> Send --> inbound      (from backend)
//! ```
//!
//! Each direction alternates strictly between one Receive and one Send
//! registration, so at most one chunk per direction is buffered.
//!
//! ## Usage
//!
//! ```ignore
//! use relay_proxy::{Backend, Listener, ListenerConfig};
//!
//! let config = ListenerConfig::new("0.0.0.0:8443".parse()?, Backend::new("example.com", 443));
//! let listener = Listener::bind(config)?;
//! listener.run()?;
//! ```

mod backend;
mod connect;
mod forward;
mod listener;
mod relay;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::{Backend, DEFAULT_CONNECT_TIMEOUT};
pub use connect::PendingConnect;
pub use forward::Forward;
pub use listener::{
    Listener, ListenerConfig, ProxyContext, RelayOptions, RelayStats, DEFAULT_ACCEPT_BACKOFF,
    DEFAULT_MAX_CONNECTIONS, DEFAULT_RECV_BLOCK,
};
pub use relay::{Direction, RelayState};
