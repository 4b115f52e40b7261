//! Receive and send handlers.
//!
//! One relay direction cycles through two registrations:
//!
//! ```text
//! Receive(source, peer = destination)
//!     -- data -->  Send(destination, RelayState { payload, sent: 0, source })
//!     -- flushed --> Receive(source, peer = destination)
//! ```
//!
//! Would-block on either side re-registers the same work unchanged. An empty
//! read, a zero-length write or any other I/O error closes both ends of the
//! pair and removes every registration for both handles.

use std::io;
use std::sync::Arc;

use relay_reactor::{Engine, Handle, Multiplexer, Sockets, Verdict};
use tracing::{debug, trace};

use super::forward::Forward;
use super::listener::ProxyContext;

/// Which way bytes flow through a relay step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client to backend.
    ToBackend,
    /// Backend to client.
    FromBackend,
}

/// A chunk being flushed to the destination of a relay step.
///
/// `sent` never decreases and never exceeds the payload length.
#[derive(Debug, PartialEq, Eq)]
pub struct RelayState {
    payload: Vec<u8>,
    sent: usize,
    source: Handle,
}

impl RelayState {
    /// Start relaying `payload` that was read from `source`.
    pub fn new(payload: Vec<u8>, source: Handle) -> Self {
        Self {
            payload,
            sent: 0,
            source,
        }
    }

    /// The whole chunk.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Bytes not yet written.
    pub fn remaining(&self) -> &[u8] {
        &self.payload[self.sent..]
    }

    /// Bytes already written.
    pub fn sent(&self) -> usize {
        self.sent
    }

    /// Handle to resume reading from once the chunk is flushed.
    pub fn source(&self) -> Handle {
        self.source
    }

    /// Record `n` more bytes as written, saturating at the payload length.
    pub fn advance(&mut self, n: usize) {
        self.sent = self.sent.saturating_add(n).min(self.payload.len());
    }

    /// True once every byte has been written.
    pub fn is_flushed(&self) -> bool {
        self.sent == self.payload.len()
    }
}

fn is_retryable(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// Close both ends of a relay pair.
fn teardown<S>(engine: &mut Engine<Forward, S>, a: Handle, b: Handle, context: &ProxyContext)
where
    S: Multiplexer + Sockets,
{
    engine.close(a);
    engine.close(b);
    context.stats.relay_closed();
}

pub(crate) fn on_receive<S>(
    engine: &mut Engine<Forward, S>,
    source: Handle,
    context: Arc<ProxyContext>,
    peer: Handle,
    direction: Direction,
) -> Verdict<Forward>
where
    S: Multiplexer + Sockets,
{
    let mut buf = vec![0u8; context.options.recv_block];

    match engine.io_mut().recv(source, &mut buf) {
        Ok(0) => {
            debug!(
                handle = %source,
                peer = %peer,
                peer_addr = ?engine.io().peer_addr(source),
                ?direction,
                "Connection closed by peer"
            );
            teardown(engine, source, peer, &context);
            Verdict::Done
        }
        Ok(n) => {
            buf.truncate(n);
            trace!(handle = %source, peer = %peer, bytes = n, "Received");
            engine.register_writable(
                peer,
                Forward::Send {
                    context,
                    relay: RelayState::new(buf, source),
                    direction,
                },
            );
            Verdict::Done
        }
        Err(e) if is_retryable(&e) => {
            trace!(handle = %source, "Receive would block, re-registering");
            Verdict::Continue(Forward::Receive {
                context,
                peer,
                direction,
            })
        }
        Err(e) => {
            debug!(
                handle = %source,
                peer = %peer,
                peer_addr = ?engine.io().peer_addr(source),
                error = %e,
                "Receive failed"
            );
            teardown(engine, source, peer, &context);
            Verdict::Done
        }
    }
}

pub(crate) fn on_send<S>(
    engine: &mut Engine<Forward, S>,
    destination: Handle,
    context: Arc<ProxyContext>,
    mut relay: RelayState,
    direction: Direction,
) -> Verdict<Forward>
where
    S: Multiplexer + Sockets,
{
    match engine.io_mut().send(destination, relay.remaining()) {
        Ok(0) => {
            debug!(
                handle = %destination,
                peer = %relay.source(),
                peer_addr = ?engine.io().peer_addr(destination),
                "Send socket connection broken"
            );
            teardown(engine, destination, relay.source(), &context);
            Verdict::Done
        }
        Ok(n) => {
            relay.advance(n);
            context.stats.record_bytes(direction, n);
            trace!(
                handle = %destination,
                bytes = n,
                sent = relay.sent(),
                total = relay.payload().len(),
                "Sent"
            );

            if !relay.is_flushed() {
                return Verdict::Continue(Forward::Send {
                    context,
                    relay,
                    direction,
                });
            }

            engine.register_readable(
                relay.source(),
                Forward::Receive {
                    context,
                    peer: destination,
                    direction,
                },
            );
            Verdict::Done
        }
        Err(e) if is_retryable(&e) => {
            trace!(handle = %destination, "Send would block, re-registering");
            Verdict::Continue(Forward::Send {
                context,
                relay,
                direction,
            })
        }
        Err(e) => {
            debug!(
                handle = %destination,
                peer = %relay.source(),
                peer_addr = ?engine.io().peer_addr(destination),
                error = %e,
                "Send failed"
            );
            teardown(engine, destination, relay.source(), &context);
            Verdict::Done
        }
    }
}
