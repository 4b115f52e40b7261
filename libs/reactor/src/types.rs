//! Core identifier types.

use std::fmt;

/// Opaque identifier for one socket owned by a [`Sockets`](crate::Sockets)
/// implementation.
///
/// Handles are allocated on listen, accept and connect and are never reused
/// by the same socket table, so a stale handle can only ever miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(usize);

impl Handle {
    /// Create a handle from a raw index.
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Raw index, used as the poll token.
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<mio::Token> for Handle {
    fn from(token: mio::Token) -> Self {
        Self(token.0)
    }
}

impl From<Handle> for mio::Token {
    fn from(handle: Handle) -> Self {
        mio::Token(handle.0)
    }
}

/// Readiness kind a handler is registered or dispatched under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interest {
    /// The handle can be read (or accepted from) without blocking.
    Readable,
    /// The handle can be written without blocking.
    Writable,
    /// The handle reported an error condition. Dispatch only; there is no
    /// handler table for this kind.
    Exceptional,
    /// The wait elapsed with nothing ready.
    Timed,
}

impl Interest {
    /// Returns true if handlers can be registered under this kind.
    pub fn has_table(self) -> bool {
        !matches!(self, Interest::Exceptional)
    }
}

impl fmt::Display for Interest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Interest::Readable => "readable",
            Interest::Writable => "writable",
            Interest::Exceptional => "exceptional",
            Interest::Timed => "timed",
        };
        f.write_str(name)
    }
}
