//! Readiness dispatch engine for the relay proxy.
//!
//! This library provides:
//! - [`Registry`]: per-interest tables of pending handlers keyed by [`Handle`]
//! - [`Engine`]: the wait/dispatch loop that drives registered handlers
//! - [`Multiplexer`] and [`Sockets`]: the seams to the OS readiness primitive
//! - [`Poller`]: the `mio` backed implementation of both seams
//!
//! ## Architecture
//!
//! ```text
//! Poller (wait) -> Engine (take) -> Handler::call -> Verdict -> Registry
//!                                         |
//!                                  Engine::register_* (follow-up work)
//! ```
//!
//! Everything runs on the calling thread. A handler runs to completion before
//! the next one is taken, and all waiting happens inside [`Multiplexer::wait`].

pub mod engine;
pub mod error;
pub mod multiplexer;
pub mod poller;
pub mod registry;
pub mod types;

pub use engine::{Engine, Handler, Verdict, DEFAULT_WAIT_TIMEOUT};
pub use error::ReactorError;
pub use multiplexer::{Multiplexer, Readiness, Sockets};
pub use poller::Poller;
pub use registry::Registry;
pub use types::{Handle, Interest};
