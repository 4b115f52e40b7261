//! Wait/dispatch loop.
//!
//! The engine owns the [`Registry`] and the multiplexer. Each turn it waits
//! for readiness on every handle with a pending readable or writable handler,
//! then takes and invokes the matching handlers one at a time:
//!
//! 1. readable handles, dispatched as [`Interest::Readable`]
//! 2. writable handles, dispatched as [`Interest::Writable`]
//! 3. exceptional handles, dispatched as [`Interest::Exceptional`]
//!
//! Timed handlers come in two flavours. A plain timed handler fires when a
//! wait returns nothing. A timed handler with a deadline fires on the first
//! turn that ends at or after its deadline, and the wait is shortened so that
//! turn is not late. The loop stops once the registry is empty.
//!
//! A handler is removed from the registry before it is called, so anything it
//! registers (including a registration for its own key) is never confused
//! with the entry being dispatched.

use std::collections::HashMap;
use std::io;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::error::ReactorError;
use crate::multiplexer::{Multiplexer, Sockets};
use crate::registry::Registry;
use crate::types::{Handle, Interest};

/// Default readiness wait timeout.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// What the engine should do with a handler after it ran.
#[derive(Debug)]
pub enum Verdict<H> {
    /// No further interest for the dispatched key.
    Done,
    /// Register the returned handler under the same kind and handle it was
    /// dispatched for.
    Continue(H),
    /// Register the returned handler under a different key.
    Reregister {
        kind: Interest,
        handle: Handle,
        handler: H,
    },
}

/// A pending unit of work stored in the registry.
///
/// The handler value carries its own state. `call` consumes it, so state is
/// moved into the next registration rather than copied.
pub trait Handler<M: Multiplexer>: Sized {
    /// Run the handler for `handle`.
    fn call(self, engine: &mut Engine<Self, M>, handle: Handle) -> Verdict<Self>;

    /// Short name used in diagnostics.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Single-threaded readiness dispatch engine.
pub struct Engine<H, M> {
    registry: Registry<H>,
    /// Deadlines of timed registrations that have one.
    deadlines: HashMap<Handle, Instant>,
    mux: M,
    timeout: Duration,
}

impl<H, M> Engine<H, M>
where
    H: Handler<M>,
    M: Multiplexer,
{
    /// Create an engine with the default wait timeout.
    pub fn new(mux: M) -> Self {
        Self::with_timeout(mux, DEFAULT_WAIT_TIMEOUT)
    }

    /// Create an engine with a custom wait timeout.
    pub fn with_timeout(mux: M, timeout: Duration) -> Self {
        Self {
            registry: Registry::new(),
            deadlines: HashMap::new(),
            mux,
            timeout,
        }
    }

    /// Wait timeout used for every turn.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The registry of pending handlers.
    pub fn registry(&self) -> &Registry<H> {
        &self.registry
    }

    /// The multiplexer / socket table.
    pub fn io(&self) -> &M {
        &self.mux
    }

    /// Mutable access to the multiplexer / socket table.
    pub fn io_mut(&mut self) -> &mut M {
        &mut self.mux
    }

    /// Insert or replace the handler for `(kind, handle)`.
    ///
    /// A replaced handler is dropped without being invoked.
    pub fn register(
        &mut self,
        kind: Interest,
        handle: Handle,
        handler: H,
    ) -> Result<(), ReactorError> {
        let name = handler.name();
        if kind == Interest::Timed {
            self.deadlines.remove(&handle);
        }
        if let Some(previous) = self.registry.register(kind, handle, handler)? {
            debug!(
                kind = %kind,
                handle = %handle,
                previous = previous.name(),
                "Duplicate handler registration replaced"
            );
        }
        trace!(kind = %kind, handle = %handle, handler = name, "Handler registered");
        Ok(())
    }

    /// Register a handler for read readiness on `handle`.
    pub fn register_readable(&mut self, handle: Handle, handler: H) {
        self.register_supported(Interest::Readable, handle, handler);
    }

    /// Register a handler for write readiness on `handle`.
    pub fn register_writable(&mut self, handle: Handle, handler: H) {
        self.register_supported(Interest::Writable, handle, handler);
    }

    /// Register a handler fired when a wait elapses with nothing ready.
    pub fn register_timed(&mut self, handle: Handle, handler: H) {
        self.register_supported(Interest::Timed, handle, handler);
    }

    /// Register a handler fired once `deadline` has passed, whether or not
    /// anything else became ready.
    pub fn register_deadline(&mut self, handle: Handle, deadline: Instant, handler: H) {
        self.register_supported(Interest::Timed, handle, handler);
        self.deadlines.insert(handle, deadline);
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    fn register_supported(&mut self, kind: Interest, handle: Handle, handler: H) {
        debug_assert!(kind.has_table());
        if let Err(e) = self.register(kind, handle, handler) {
            debug!(kind = %kind, handle = %handle, error = %e, "Registration rejected");
        }
    }

    /// Remove every pending handler for `handle`.
    pub fn unregister_all(&mut self, handle: Handle) {
        self.deadlines.remove(&handle);
        let removed = self.registry.unregister_all(handle);
        if removed > 0 {
            trace!(handle = %handle, removed, "Handlers removed");
        }
    }

    /// Total number of pending handlers.
    pub fn count(&self) -> usize {
        self.registry.count()
    }

    /// True while there is pending work.
    pub fn is_running(&self) -> bool {
        self.count() > 0
    }

    /// Run turns until the registry is empty.
    pub fn run(&mut self) -> Result<(), ReactorError> {
        debug!(handlers = self.count(), "Dispatch loop started");
        while self.is_running() {
            self.turn()?;
        }
        debug!("Dispatch loop stopped: no handlers left");
        Ok(())
    }

    /// One wait followed by dispatch of everything it reported.
    pub fn turn(&mut self) -> Result<(), ReactorError> {
        let readable = self.registry.handles(Interest::Readable);
        let writable = self.registry.handles(Interest::Writable);
        trace!(
            readable = readable.len(),
            writable = writable.len(),
            "Waiting for readiness"
        );

        let timeout = self
            .next_deadline()
            .map(|at| at.saturating_duration_since(Instant::now()).min(self.timeout))
            .unwrap_or(self.timeout);

        let ready = match self.mux.wait(&readable, &writable, timeout) {
            Ok(ready) => ready,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(ReactorError::Wait(e)),
        };

        let quiet = ready.is_empty();
        for handle in ready.readable {
            self.dispatch(Interest::Readable, handle)?;
        }
        for handle in ready.writable {
            self.dispatch(Interest::Writable, handle)?;
        }
        for handle in ready.exceptional {
            self.dispatch(Interest::Exceptional, handle)?;
        }
        self.dispatch_timed(quiet)
    }

    /// Fire expired deadlines, and on a quiet wait every plain timed handler.
    fn dispatch_timed(&mut self, quiet: bool) -> Result<(), ReactorError> {
        let now = Instant::now();
        let due: Vec<Handle> = self
            .registry
            .handles(Interest::Timed)
            .into_iter()
            .filter(|handle| match self.deadlines.get(handle) {
                Some(at) => *at <= now,
                None => quiet,
            })
            .collect();

        if due.is_empty() {
            if quiet {
                debug!("Wait timed out, no timed handlers due");
            }
            return Ok(());
        }
        for handle in due {
            self.dispatch(Interest::Timed, handle)?;
        }
        Ok(())
    }

    /// Exceptional conditions go to the handle's own handler so that its next
    /// I/O attempt surfaces the error. Readable first, then writable.
    fn take_for(&mut self, kind: Interest, handle: Handle) -> Option<(Interest, H)> {
        match kind {
            Interest::Exceptional => [Interest::Readable, Interest::Writable]
                .into_iter()
                .find_map(|slot| self.registry.take(slot, handle).map(|h| (slot, h))),
            Interest::Timed => {
                self.deadlines.remove(&handle);
                self.registry.take(kind, handle).map(|h| (kind, h))
            }
            _ => self.registry.take(kind, handle).map(|h| (kind, h)),
        }
    }

    fn dispatch(&mut self, kind: Interest, handle: Handle) -> Result<(), ReactorError> {
        trace!(kind = %kind, handle = %handle, "Dispatching");

        let Some((slot, handler)) = self.take_for(kind, handle) else {
            // An earlier handler in this batch already closed and removed it.
            trace!(kind = %kind, handle = %handle, "Handler already removed");
            return Ok(());
        };

        let name = handler.name();
        match handler.call(self, handle) {
            Verdict::Done => {
                trace!(kind = %slot, handle = %handle, handler = name, "Handler finished");
                Ok(())
            }
            Verdict::Continue(next) => self.register(slot, handle, next),
            Verdict::Reregister {
                kind,
                handle,
                handler,
            } => self.register(kind, handle, handler),
        }
    }
}

impl<H, M> Engine<H, M>
where
    H: Handler<M>,
    M: Multiplexer + Sockets,
{
    /// Close `handle` and drop every pending handler for it.
    pub fn close(&mut self, handle: Handle) {
        self.unregister_all(handle);
        self.mux.close(handle);
    }
}
