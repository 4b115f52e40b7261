//! `mio` backed readiness multiplexer and socket table.
//!
//! `mio` reports readiness edge-triggered. The dispatch loop expects
//! select-style level semantics (a handle that is still ready is reported
//! again), so the poller keeps track of what each socket is armed for and
//! re-arms:
//! - sockets whose requested interest changed since the previous wait
//! - sockets that produced an event on the previous wait and are still watched
//!
//! Re-registering a ready socket makes the OS queue a fresh event for it.

use std::collections::{HashMap, HashSet};
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::time::Duration;

use mio::event::Source;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Poll};
use tracing::{debug, trace, warn};

use crate::multiplexer::{not_connected, Multiplexer, Readiness, Sockets};
use crate::types::Handle;

/// Default capacity of the per-wait event buffer.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

enum Socket {
    Listener(TcpListener),
    Stream(TcpStream),
}

impl Socket {
    fn source(&mut self) -> &mut dyn Source {
        match self {
            Socket::Listener(listener) => listener,
            Socket::Stream(stream) => stream,
        }
    }

    fn stream(&mut self) -> io::Result<&mut TcpStream> {
        match self {
            Socket::Stream(stream) => Ok(stream),
            Socket::Listener(_) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "operation requires a connected stream",
            )),
        }
    }
}

struct Slot {
    socket: Socket,
    armed: Option<mio::Interest>,
}

/// Readiness multiplexer and socket table over a single `mio::Poll`.
pub struct Poller {
    poll: Poll,
    events: Events,
    slots: HashMap<Handle, Slot>,
    /// Handles that produced an event on the previous wait.
    fired: HashSet<Handle>,
    next_handle: usize,
}

impl Poller {
    /// Create a poller with the default event capacity.
    pub fn new() -> io::Result<Self> {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// Create a poller with a custom event capacity.
    pub fn with_capacity(event_capacity: usize) -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(event_capacity.max(1)),
            slots: HashMap::new(),
            fired: HashSet::new(),
            next_handle: 0,
        })
    }

    fn insert(&mut self, socket: Socket) -> Handle {
        let handle = Handle::new(self.next_handle);
        self.next_handle += 1;
        self.slots.insert(
            handle,
            Slot {
                socket,
                armed: None,
            },
        );
        handle
    }

    /// Bind a non-blocking listening socket and add it to the table.
    ///
    /// The socket is bound with address reuse enabled.
    pub fn listen(&mut self, addr: SocketAddr) -> io::Result<Handle> {
        let listener = TcpListener::bind(addr)?;
        let handle = self.insert(Socket::Listener(listener));
        debug!(handle = %handle, bind_addr = %addr, "Listening socket created");
        Ok(handle)
    }

    /// Local address of any handle in the table.
    pub fn local_addr(&self, handle: Handle) -> io::Result<SocketAddr> {
        match self.slots.get(&handle).map(|slot| &slot.socket) {
            Some(Socket::Listener(listener)) => listener.local_addr(),
            Some(Socket::Stream(stream)) => stream.local_addr(),
            None => Err(not_connected(handle)),
        }
    }

    /// Bring every socket's registration in line with the requested sets.
    ///
    /// Returns handles whose (re)registration failed; they are reported as
    /// exceptional so their handler observes the failure.
    fn arm(&mut self, readable: &HashSet<Handle>, writable: &HashSet<Handle>) -> Vec<Handle> {
        let fired = std::mem::take(&mut self.fired);
        let registry = self.poll.registry();
        let mut failed = Vec::new();

        for (handle, slot) in self.slots.iter_mut() {
            let wanted = match (readable.contains(handle), writable.contains(handle)) {
                (true, true) => Some(mio::Interest::READABLE | mio::Interest::WRITABLE),
                (true, false) => Some(mio::Interest::READABLE),
                (false, true) => Some(mio::Interest::WRITABLE),
                (false, false) => None,
            };
            let token = mio::Token::from(*handle);

            let result = match (slot.armed, wanted) {
                (None, Some(interest)) => registry.register(slot.socket.source(), token, interest),
                (Some(_), None) => registry.deregister(slot.socket.source()),
                (Some(current), Some(interest)) if current != interest || fired.contains(handle) => {
                    registry.reregister(slot.socket.source(), token, interest)
                }
                _ => Ok(()),
            };

            match result {
                Ok(()) => slot.armed = wanted,
                Err(e) => {
                    warn!(handle = %handle, error = %e, "Failed to arm socket");
                    slot.armed = None;
                    if wanted.is_some() {
                        failed.push(*handle);
                    }
                }
            }
        }

        failed
    }
}

/// Which ready sets one poll event lands in.
#[derive(Debug, Default, PartialEq, Eq)]
struct Route {
    readable: bool,
    writable: bool,
    exceptional: bool,
}

impl Route {
    /// An error is only reported as exceptional when it is not already
    /// delivered through a watched readable or writable set.
    fn new(
        can_read: bool,
        can_write: bool,
        error: bool,
        wants_read: bool,
        wants_write: bool,
    ) -> Self {
        let readable = can_read && wants_read;
        let writable = can_write && wants_write;
        Self {
            readable,
            writable,
            exceptional: error && !readable && !writable,
        }
    }
}

impl Multiplexer for Poller {
    fn wait(
        &mut self,
        readable: &[Handle],
        writable: &[Handle],
        timeout: Duration,
    ) -> io::Result<Readiness> {
        let readable: HashSet<Handle> = readable.iter().copied().collect();
        let writable: HashSet<Handle> = writable.iter().copied().collect();

        let failed = self.arm(&readable, &writable);
        if !failed.is_empty() {
            return Ok(Readiness {
                exceptional: failed,
                ..Readiness::default()
            });
        }

        self.poll.poll(&mut self.events, Some(timeout))?;

        let mut ready = Readiness::default();
        for event in self.events.iter() {
            let handle = Handle::from(event.token());
            if !self.slots.contains_key(&handle) {
                continue;
            }
            self.fired.insert(handle);

            let route = Route::new(
                event.is_readable() || event.is_read_closed(),
                event.is_writable() || event.is_write_closed(),
                event.is_error(),
                readable.contains(&handle),
                writable.contains(&handle),
            );
            if route.readable {
                ready.readable.push(handle);
            }
            if route.writable {
                ready.writable.push(handle);
            }
            if route.exceptional {
                ready.exceptional.push(handle);
            }
        }

        trace!(
            readable = ready.readable.len(),
            writable = ready.writable.len(),
            exceptional = ready.exceptional.len(),
            "Wait returned"
        );
        Ok(ready)
    }
}

impl Sockets for Poller {
    fn accept(&mut self, listener: Handle) -> io::Result<(Handle, SocketAddr)> {
        let (stream, peer) = match self.slots.get_mut(&listener).map(|slot| &mut slot.socket) {
            Some(Socket::Listener(socket)) => socket.accept()?,
            Some(Socket::Stream(_)) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "accept requires a listening socket",
                ))
            }
            None => return Err(not_connected(listener)),
        };
        Ok((self.insert(Socket::Stream(stream)), peer))
    }

    fn connect(&mut self, addr: SocketAddr) -> io::Result<Handle> {
        let stream = TcpStream::connect(addr)?;
        let handle = self.insert(Socket::Stream(stream));
        debug!(handle = %handle, addr = %addr, "Outbound connection started");
        Ok(handle)
    }

    fn finish_connect(&mut self, handle: Handle) -> io::Result<()> {
        let slot = self.slots.get_mut(&handle).ok_or_else(|| not_connected(handle))?;
        let stream = slot.socket.stream()?;
        if let Some(e) = stream.take_error()? {
            return Err(e);
        }
        match stream.peer_addr() {
            Ok(_) => {
                stream.set_nodelay(true)?;
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotConnected => {
                Err(io::Error::from(io::ErrorKind::WouldBlock))
            }
            Err(e) => Err(e),
        }
    }

    fn recv(&mut self, handle: Handle, buf: &mut [u8]) -> io::Result<usize> {
        let slot = self.slots.get_mut(&handle).ok_or_else(|| not_connected(handle))?;
        slot.socket.stream()?.read(buf)
    }

    fn send(&mut self, handle: Handle, buf: &[u8]) -> io::Result<usize> {
        let slot = self.slots.get_mut(&handle).ok_or_else(|| not_connected(handle))?;
        slot.socket.stream()?.write(buf)
    }

    fn close(&mut self, handle: Handle) {
        let Some(mut slot) = self.slots.remove(&handle) else {
            return;
        };
        if slot.armed.is_some() {
            if let Err(e) = self.poll.registry().deregister(slot.socket.source()) {
                trace!(handle = %handle, error = %e, "Deregister on close failed");
            }
        }
        self.fired.remove(&handle);
        debug!(handle = %handle, "Socket closed");
    }

    fn peer_addr(&self, handle: Handle) -> Option<SocketAddr> {
        match self.slots.get(&handle).map(|slot| &slot.socket) {
            Some(Socket::Stream(stream)) => stream.peer_addr().ok(),
            _ => None,
        }
    }
}
