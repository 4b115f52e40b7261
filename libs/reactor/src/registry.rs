//! Handler registry.
//!
//! Three independent tables (readable, writable, timed) map a [`Handle`] to
//! the handler value that should run the next time that handle is dispatched
//! under that kind. The registry is the only owner of pending handlers.

use std::collections::HashMap;

use crate::error::ReactorError;
use crate::types::{Handle, Interest};

/// Pending handlers keyed by `(Interest, Handle)`.
#[derive(Debug)]
pub struct Registry<H> {
    readable: HashMap<Handle, H>,
    writable: HashMap<Handle, H>,
    timed: HashMap<Handle, H>,
}

impl<H> Default for Registry<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> Registry<H> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            readable: HashMap::new(),
            writable: HashMap::new(),
            timed: HashMap::new(),
        }
    }

    fn table(&self, kind: Interest) -> Option<&HashMap<Handle, H>> {
        match kind {
            Interest::Readable => Some(&self.readable),
            Interest::Writable => Some(&self.writable),
            Interest::Timed => Some(&self.timed),
            Interest::Exceptional => None,
        }
    }

    fn table_mut(&mut self, kind: Interest) -> Option<&mut HashMap<Handle, H>> {
        match kind {
            Interest::Readable => Some(&mut self.readable),
            Interest::Writable => Some(&mut self.writable),
            Interest::Timed => Some(&mut self.timed),
            Interest::Exceptional => None,
        }
    }

    /// Insert or replace the handler for `(kind, handle)`.
    ///
    /// Returns the handler that was replaced, if any. The caller decides what
    /// to do with it; it is never invoked by the registry.
    pub fn register(
        &mut self,
        kind: Interest,
        handle: Handle,
        handler: H,
    ) -> Result<Option<H>, ReactorError> {
        let table = self
            .table_mut(kind)
            .ok_or(ReactorError::UnsupportedInterest(kind))?;
        Ok(table.insert(handle, handler))
    }

    /// Remove and return the handler for `(kind, handle)`.
    pub fn take(&mut self, kind: Interest, handle: Handle) -> Option<H> {
        self.table_mut(kind)?.remove(&handle)
    }

    /// Remove every handler for `handle` across all tables.
    ///
    /// Returns how many registrations were dropped.
    pub fn unregister_all(&mut self, handle: Handle) -> usize {
        [&mut self.readable, &mut self.writable, &mut self.timed]
            .into_iter()
            .filter_map(|table| table.remove(&handle))
            .count()
    }

    /// Borrow the handler for `(kind, handle)` without removing it.
    pub fn get(&self, kind: Interest, handle: Handle) -> Option<&H> {
        self.table(kind)?.get(&handle)
    }

    /// Check whether a handler is pending for `(kind, handle)`.
    pub fn contains(&self, kind: Interest, handle: Handle) -> bool {
        self.get(kind, handle).is_some()
    }

    /// Check whether any handler is pending for `handle`.
    pub fn watches(&self, handle: Handle) -> bool {
        self.readable.contains_key(&handle)
            || self.writable.contains_key(&handle)
            || self.timed.contains_key(&handle)
    }

    /// Snapshot of the handles with a pending handler of `kind`, in handle
    /// order.
    pub fn handles(&self, kind: Interest) -> Vec<Handle> {
        let mut handles: Vec<Handle> = self
            .table(kind)
            .map(|table| table.keys().copied().collect())
            .unwrap_or_default();
        handles.sort_unstable();
        handles
    }

    /// Total number of live registrations across all tables.
    pub fn count(&self) -> usize {
        self.readable.len() + self.writable.len() + self.timed.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }
}
