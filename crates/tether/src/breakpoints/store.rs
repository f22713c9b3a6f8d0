use thiserror::Error;

use super::model::{BreakpointSpec, LocalBreakpoint, LocalBreakpointId};

/// Errors raised by a [`LocalBreakpointStore`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// No breakpoint with that id exists.
    #[error("unknown local breakpoint {id}")]
    UnknownBreakpoint {
        /// Identifier that was not found.
        id: LocalBreakpointId,
    },
    /// The store refused the change.
    #[error("breakpoint store rejected the change: {message}")]
    Rejected {
        /// Reason supplied by the store.
        message: String,
    },
}

/// The editor-side breakpoint collection.
///
/// Reads are a flat snapshot; creates and deletes are applied one at a time
/// and return synchronously.
pub trait LocalBreakpointStore: Send + Sync {
    /// Snapshot of every local breakpoint.
    fn breakpoints(&self) -> Vec<LocalBreakpoint>;

    /// Creates a breakpoint matching `spec`.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the store cannot create it.
    fn create(&self, spec: &BreakpointSpec) -> Result<LocalBreakpointId, StoreError>;

    /// Deletes the breakpoint `id`.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the breakpoint cannot be removed.
    fn delete(&self, id: LocalBreakpointId) -> Result<(), StoreError>;
}
