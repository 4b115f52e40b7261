//! Seams between the engine and the operating system.
//!
//! [`Multiplexer`] is the readiness wait the dispatch loop blocks in.
//! [`Sockets`] is the socket table handlers use to perform non-blocking I/O
//! on the handles they were dispatched for.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use crate::types::Handle;

/// Ready subsets returned by one [`Multiplexer::wait`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Readiness {
    /// Handles that can be read without blocking.
    pub readable: Vec<Handle>,
    /// Handles that can be written without blocking.
    pub writable: Vec<Handle>,
    /// Handles that reported an error condition.
    pub exceptional: Vec<Handle>,
}

impl Readiness {
    /// True when nothing became ready before the timeout.
    pub fn is_empty(&self) -> bool {
        self.readable.is_empty() && self.writable.is_empty() && self.exceptional.is_empty()
    }
}

/// Blocking readiness wait.
pub trait Multiplexer {
    /// Block until at least one watched handle is ready or `timeout` elapses.
    ///
    /// `readable` doubles as the exceptional-interest set. Handles outside
    /// both sets must not be reported.
    fn wait(
        &mut self,
        readable: &[Handle],
        writable: &[Handle],
        timeout: Duration,
    ) -> io::Result<Readiness>;
}

/// Non-blocking socket operations keyed by [`Handle`].
///
/// Every operation on a handle that was closed (or never existed) fails with
/// [`io::ErrorKind::NotConnected`].
pub trait Sockets {
    /// Accept one pending connection from a listening handle.
    fn accept(&mut self, listener: Handle) -> io::Result<(Handle, SocketAddr)>;

    /// Start a non-blocking outbound connection to `addr`.
    ///
    /// The handle becomes writable once the attempt settles; call
    /// [`finish_connect`](Sockets::finish_connect) then to learn the outcome.
    fn connect(&mut self, addr: SocketAddr) -> io::Result<Handle>;

    /// Outcome of a connection started with [`connect`](Sockets::connect).
    ///
    /// `WouldBlock` while the attempt is still in progress.
    fn finish_connect(&mut self, handle: Handle) -> io::Result<()>;

    /// Read at most `buf.len()` bytes. `Ok(0)` means the peer closed.
    fn recv(&mut self, handle: Handle, buf: &mut [u8]) -> io::Result<usize>;

    /// Write as much of `buf` as the socket accepts.
    fn send(&mut self, handle: Handle, buf: &[u8]) -> io::Result<usize>;

    /// Close a handle. Closing twice is a no-op.
    fn close(&mut self, handle: Handle);

    /// Remote address of a connected handle.
    fn peer_addr(&self, handle: Handle) -> Option<SocketAddr>;
}

pub(crate) fn not_connected(handle: Handle) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotConnected,
        format!("unknown socket handle {}", handle),
    )
}
