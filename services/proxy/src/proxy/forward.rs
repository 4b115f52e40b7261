//! The handler type stored in the engine's registry.

use std::sync::Arc;

use relay_reactor::{Engine, Handle, Handler, Multiplexer, Sockets, Verdict};

use super::connect::{self, PendingConnect};
use super::listener::{self, ProxyContext};
use super::relay::{self, Direction, RelayState};

/// Forwarding handler. Each variant carries the state its step needs.
#[derive(Debug)]
pub enum Forward {
    /// Listening handle is readable: accept and connect to the backend.
    Accept(Arc<ProxyContext>),
    /// Backend attempt settled: check whether it connected.
    Connect(PendingConnect),
    /// Backend attempt ran past the connect timeout.
    ConnectTimeout(PendingConnect),
    /// Relay endpoint is readable: read one chunk destined for `peer`.
    Receive {
        context: Arc<ProxyContext>,
        peer: Handle,
        direction: Direction,
    },
    /// Relay endpoint is writable: flush the pending chunk.
    Send {
        context: Arc<ProxyContext>,
        relay: RelayState,
        direction: Direction,
    },
}

impl<S> Handler<S> for Forward
where
    S: Multiplexer + Sockets,
{
    fn call(self, engine: &mut Engine<Self, S>, handle: Handle) -> Verdict<Self> {
        match self {
            Forward::Accept(context) => listener::on_accept(engine, handle, context),
            Forward::Connect(pending) => connect::on_connect(engine, handle, pending),
            Forward::ConnectTimeout(pending) => {
                connect::on_connect_timeout(engine, handle, pending)
            }
            Forward::Receive {
                context,
                peer,
                direction,
            } => relay::on_receive(engine, handle, context, peer, direction),
            Forward::Send {
                context,
                relay,
                direction,
            } => relay::on_send(engine, handle, context, relay, direction),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Forward::Accept(_) => "accept",
            Forward::Connect(_) => "connect",
            Forward::ConnectTimeout(_) => "connect-timeout",
            Forward::Receive { .. } => "receive",
            Forward::Send { .. } => "send",
        }
    }
}
