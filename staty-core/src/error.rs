//! Error types for the reactive state container.

use thiserror::Error;

use crate::snapshot::Snapshot;
use crate::value::Path;

/// Result type for state operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the graph, the action manager and user handlers.
#[derive(Debug, Error)]
pub enum Error {
    /// Only objects, sequences, maps and sets can be wrapped.
    #[error("the target is not valid for a reactive state: {found}")]
    InvalidTarget {
        /// Kind of the rejected value.
        found: &'static str,
    },

    /// Linking the value would make a node reachable from itself.
    #[error("circular reference detected at `{path}`")]
    CircularReference {
        /// Location of the offending slot, starting at the colliding node.
        path: Path,
        /// Snapshot of the node that would have become its own descendant.
        value: Snapshot,
    },

    /// A graph operation was called on a value that has no node.
    #[error("state is not valid: {reason}")]
    InvalidState {
        /// What was wrong with the target.
        reason: String,
    },

    /// An explicit action was opened while another one is still running.
    #[error("action `{requested}` cannot start while `{running}` is running")]
    ConcurrentAction {
        /// Name of the action that is already open.
        running: String,
        /// Name of the action that was rejected.
        requested: String,
    },

    /// A subscriber failed while being notified.
    #[error("subscriber failed during `{action}`: {source}")]
    Subscriber {
        /// Name of the action being dispatched.
        action: String,
        /// The handler's own error.
        #[source]
        source: Box<Error>,
    },

    /// A handler or an action body rejected the change.
    #[error("validation failed: {message}")]
    Validation {
        /// Reason given by the caller.
        message: String,
    },

    /// Any other error produced by user code.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error>),
}

impl Error {
    /// Build a validation error, the usual way for a `before` handler to veto
    /// an action.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_state(reason: impl Into<String>) -> Self {
        Self::InvalidState {
            reason: reason.into(),
        }
    }

    /// Check whether this error was raised by cycle detection.
    pub fn is_circular_reference(&self) -> bool {
        matches!(self, Self::CircularReference { .. })
    }
}
