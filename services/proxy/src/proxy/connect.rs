//! Non-blocking backend connect.
//!
//! Resolved addresses are tried in order. Each attempt arms two handlers on
//! the outbound handle: a writable step that reads the outcome and a
//! deadline that abandons the attempt once the connect timeout passes.
//! Whichever runs first removes the other. The inbound handle stays
//! unwatched until the backend side is up.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use relay_reactor::{Engine, Handle, Multiplexer, Sockets, Verdict};
use tracing::{debug, warn};

use super::forward::Forward;
use super::listener::ProxyContext;
use super::relay::Direction;

/// A backend connection being established for one accepted client.
#[derive(Debug, Clone)]
pub struct PendingConnect {
    pub(crate) context: Arc<ProxyContext>,
    pub(crate) inbound: Handle,
    pub(crate) peer_addr: SocketAddr,
    addrs: Vec<SocketAddr>,
    next: usize,
    last_error: Option<io::ErrorKind>,
}

impl PendingConnect {
    pub(crate) fn new(
        context: Arc<ProxyContext>,
        inbound: Handle,
        peer_addr: SocketAddr,
        resolved: io::Result<Vec<SocketAddr>>,
    ) -> Self {
        let (addrs, last_error) = match resolved {
            Ok(addrs) => (addrs, None),
            Err(e) => (Vec::new(), Some(e.kind())),
        };
        Self {
            context,
            inbound,
            peer_addr,
            addrs,
            next: 0,
            last_error,
        }
    }

    /// Addresses not tried yet.
    pub fn remaining(&self) -> &[SocketAddr] {
        &self.addrs[self.next.min(self.addrs.len())..]
    }
}

/// Start the next connect attempt, or give up on the client when no address
/// is left.
pub(crate) fn start<S>(engine: &mut Engine<Forward, S>, mut pending: PendingConnect)
where
    S: Multiplexer + Sockets,
{
    while let Some(addr) = pending.addrs.get(pending.next).copied() {
        pending.next += 1;
        match engine.io_mut().connect(addr) {
            Ok(outbound) => {
                debug!(
                    peer_addr = %pending.peer_addr,
                    outbound = %outbound,
                    addr = %addr,
                    "Connecting to backend"
                );
                let deadline = Instant::now() + pending.context.options.connect_timeout;
                engine.register_deadline(
                    outbound,
                    deadline,
                    Forward::ConnectTimeout(pending.clone()),
                );
                engine.register_writable(outbound, Forward::Connect(pending));
                return;
            }
            Err(e) => {
                debug!(addr = %addr, error = %e, "Connect attempt failed");
                pending.last_error = Some(e.kind());
            }
        }
    }

    give_up(engine, pending);
}

fn give_up<S>(engine: &mut Engine<Forward, S>, pending: PendingConnect)
where
    S: Multiplexer + Sockets,
{
    pending.context.stats.connect_failed();
    warn!(
        peer_addr = %pending.peer_addr,
        backend = %pending.context.backend,
        error = ?pending.last_error,
        "Backend connection failed"
    );
    engine.close(pending.inbound);
}

/// Abandon the attempt on `outbound` and move on to the next address.
fn retry<S>(
    engine: &mut Engine<Forward, S>,
    outbound: Handle,
    mut pending: PendingConnect,
    error: io::ErrorKind,
) where
    S: Multiplexer + Sockets,
{
    pending.last_error = Some(error);
    engine.close(outbound);
    start(engine, pending);
}

pub(crate) fn on_connect<S>(
    engine: &mut Engine<Forward, S>,
    outbound: Handle,
    pending: PendingConnect,
) -> Verdict<Forward>
where
    S: Multiplexer + Sockets,
{
    match engine.io_mut().finish_connect(outbound) {
        Ok(()) => {
            // Drops the pending deadline.
            engine.unregister_all(outbound);
            pending.context.stats.record_connected();
            let PendingConnect {
                context,
                inbound,
                peer_addr,
                ..
            } = pending;
            debug!(
                peer_addr = %peer_addr,
                inbound = %inbound,
                outbound = %outbound,
                "Connected to backend"
            );
            engine.register_readable(
                inbound,
                Forward::Receive {
                    context: Arc::clone(&context),
                    peer: outbound,
                    direction: Direction::ToBackend,
                },
            );
            engine.register_readable(
                outbound,
                Forward::Receive {
                    context,
                    peer: inbound,
                    direction: Direction::FromBackend,
                },
            );
            Verdict::Done
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
            Verdict::Continue(Forward::Connect(pending))
        }
        Err(e) => {
            debug!(outbound = %outbound, error = %e, "Backend refused connection");
            retry(engine, outbound, pending, e.kind());
            Verdict::Done
        }
    }
}

pub(crate) fn on_connect_timeout<S>(
    engine: &mut Engine<Forward, S>,
    outbound: Handle,
    pending: PendingConnect,
) -> Verdict<Forward>
where
    S: Multiplexer + Sockets,
{
    debug!(
        outbound = %outbound,
        timeout = ?pending.context.options.connect_timeout,
        "Connect attempt timed out"
    );
    retry(engine, outbound, pending, io::ErrorKind::TimedOut);
    Verdict::Done
}
