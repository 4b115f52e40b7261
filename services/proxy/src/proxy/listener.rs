//! Listening socket and the accept handler.
//!
//! The listener owns the engine. Its accept handler takes one pending
//! connection per readiness and starts the matching backend connection. The
//! listening handle is re-armed as readable after every accept, whatever the
//! outcome, so the proxy keeps accepting for as long as the loop runs. The
//! one exception is a persistent accept error (out of file descriptors, for
//! example): the listener then sits out [`RelayOptions::accept_backoff`] on a
//! deadline instead, since its backlog would report it ready again at once.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use relay_reactor::{
    Engine, Handle, Interest, Multiplexer, Poller, ReactorError, Sockets, Verdict,
    DEFAULT_WAIT_TIMEOUT,
};
use tracing::{debug, error, info, warn};

use super::backend::{Backend, DEFAULT_CONNECT_TIMEOUT};
use super::connect::{self, PendingConnect};
use super::forward::Forward;
use super::relay::Direction;

/// Default maximum concurrent relays per listener.
pub const DEFAULT_MAX_CONNECTIONS: usize = 10000;

/// Default upper bound for a single read.
pub const DEFAULT_RECV_BLOCK: usize = 1024;

/// Default pause after a persistent accept error.
pub const DEFAULT_ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Per-relay tuning shared by every handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayOptions {
    /// Upper bound for a single read.
    pub recv_block: usize,
    /// Connect timeout for backend connections.
    pub connect_timeout: Duration,
    /// Maximum concurrent relays, pending backend connects included.
    pub max_connections: usize,
    /// How long the listener stops accepting after a persistent accept error.
    pub accept_backoff: Duration,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            recv_block: DEFAULT_RECV_BLOCK,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            accept_backoff: DEFAULT_ACCEPT_BACKOFF,
        }
    }
}

/// Configuration for a listener.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Where accepted connections are forwarded.
    pub backend: Backend,
    /// Relay tuning.
    pub options: RelayOptions,
    /// Readiness wait timeout.
    pub poll_timeout: Duration,
}

impl ListenerConfig {
    /// Create a new listener configuration.
    pub fn new(bind_addr: SocketAddr, backend: Backend) -> Self {
        Self {
            bind_addr,
            backend,
            options: RelayOptions::default(),
            poll_timeout: DEFAULT_WAIT_TIMEOUT,
        }
    }
}

/// Statistics for a listener.
#[derive(Debug, Default)]
pub struct RelayStats {
    /// Connections accepted within the connection limit.
    pub connections_accepted: AtomicU64,
    /// Relays currently active, including those still connecting.
    pub connections_active: AtomicU64,
    /// Relays torn down.
    pub connections_closed: AtomicU64,
    /// Connections rejected due to max limit.
    pub connections_rejected: AtomicU64,
    /// Backend connection successes.
    pub backend_connected: AtomicU64,
    /// Backend connection failures.
    pub backend_failed: AtomicU64,
    /// Bytes relayed to the backend.
    pub bytes_to_backend: AtomicU64,
    /// Bytes relayed from the backend.
    pub bytes_from_backend: AtomicU64,
}

impl RelayStats {
    pub(crate) fn relay_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_connected(&self) {
        self.backend_connected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn connect_failed(&self) {
        self.backend_failed.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn relay_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_bytes(&self, direction: Direction, n: usize) {
        let counter = match direction {
            Direction::ToBackend => &self.bytes_to_backend,
            Direction::FromBackend => &self.bytes_from_backend,
        };
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// Relays currently active.
    pub fn active(&self) -> u64 {
        self.connections_active.load(Ordering::Relaxed)
    }
}

/// State shared by every handler of one listener.
#[derive(Debug)]
pub struct ProxyContext {
    /// Where accepted connections are forwarded.
    pub backend: Backend,
    /// Relay tuning.
    pub options: RelayOptions,
    /// Statistics.
    pub stats: RelayStats,
}

impl ProxyContext {
    /// Create a context, clamping options to usable values.
    pub fn new(backend: Backend, mut options: RelayOptions) -> Self {
        options.recv_block = options.recv_block.max(1);
        options.connect_timeout = options.connect_timeout.max(Duration::from_millis(1));
        Self {
            backend,
            options,
            stats: RelayStats::default(),
        }
    }
}

/// A listening socket and the engine that serves it.
pub struct Listener {
    engine: Engine<Forward, Poller>,
    handle: Handle,
    local_addr: SocketAddr,
    context: Arc<ProxyContext>,
}

impl Listener {
    /// Bind the listening socket and arm the accept handler.
    pub fn bind(config: ListenerConfig) -> io::Result<Self> {
        let mut poller = Poller::new()?;
        let handle = poller.listen(config.bind_addr)?;
        let local_addr = poller.local_addr(handle)?;

        info!(
            bind_addr = %local_addr,
            backend = %config.backend,
            max_connections = config.options.max_connections,
            "Listener bound"
        );

        let context = Arc::new(ProxyContext::new(config.backend, config.options));
        let poll_timeout = config.poll_timeout.max(Duration::from_millis(1));
        let mut engine = Engine::with_timeout(poller, poll_timeout);
        engine.register_readable(handle, Forward::Accept(Arc::clone(&context)));

        Ok(Self {
            engine,
            handle,
            local_addr,
            context,
        })
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Shared handler context.
    pub fn context(&self) -> Arc<ProxyContext> {
        Arc::clone(&self.context)
    }

    /// Get listener statistics.
    pub fn stats(&self) -> &RelayStats {
        &self.context.stats
    }

    /// Run the dispatch loop until no handler is left.
    pub fn run(mut self) -> Result<(), ReactorError> {
        info!(
            bind_addr = %self.local_addr,
            poll_timeout = ?self.engine.timeout(),
            "Listener started"
        );
        let result = self.engine.run();
        self.engine.io_mut().close(self.handle);
        result
    }
}

fn rearm(listener: Handle, context: Arc<ProxyContext>) -> Verdict<Forward> {
    Verdict::Reregister {
        kind: Interest::Readable,
        handle: listener,
        handler: Forward::Accept(context),
    }
}

/// Errors that belong to the single connection being accepted.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock
            | io::ErrorKind::Interrupted
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    )
}

/// Runs on read readiness of the listening handle, or when its backoff
/// deadline passes.
pub(crate) fn on_accept<S>(
    engine: &mut Engine<Forward, S>,
    listener: Handle,
    context: Arc<ProxyContext>,
) -> Verdict<Forward>
where
    S: Multiplexer + Sockets,
{
    let (inbound, peer_addr) = match engine.io_mut().accept(listener) {
        Ok(accepted) => accepted,
        Err(e) if is_transient(&e) => return rearm(listener, context),
        Err(e) => {
            let backoff = context.options.accept_backoff;
            error!(handle = %listener, error = %e, ?backoff, "Accept error");
            engine.register_deadline(
                listener,
                Instant::now() + backoff,
                Forward::Accept(context),
            );
            return Verdict::Done;
        }
    };

    let stats = &context.stats;
    if stats.active() >= context.options.max_connections as u64 {
        stats.connections_rejected.fetch_add(1, Ordering::Relaxed);
        warn!(peer_addr = %peer_addr, "Connection rejected: max connections reached");
        engine.close(inbound);
        return rearm(listener, context);
    }
    stats.relay_opened();

    debug!(
        peer_addr = %peer_addr,
        inbound = %inbound,
        backend = %context.backend,
        "New connection"
    );

    let resolved = context.backend.resolve();
    connect::start(
        engine,
        PendingConnect::new(Arc::clone(&context), inbound, peer_addr, resolved),
    );

    rearm(listener, context)
}
