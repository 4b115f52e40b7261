//! Error types for the dispatch engine.

use std::io;

use thiserror::Error;

use crate::types::Interest;

/// Errors surfaced by the engine to its caller.
#[derive(Debug, Error)]
pub enum ReactorError {
    /// A handler was registered (or re-registered) under an interest kind
    /// that has no handler table.
    #[error("unsupported handler registration for interest {0}")]
    UnsupportedInterest(Interest),

    /// The readiness wait failed with a non-retryable error.
    #[error("readiness wait failed: {0}")]
    Wait(#[source] io::Error),
}

impl ReactorError {
    /// Returns true if this error indicates a construction-time mistake
    /// rather than a runtime condition.
    pub fn is_programming_error(&self) -> bool {
        matches!(self, ReactorError::UnsupportedInterest(_))
    }
}
