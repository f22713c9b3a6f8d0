//! Single-assignment futures and fan-in aggregation.
//!
//! An [`AsyncFuture`] is lazily started by whichever caller initializes it
//! first; later callers observe the same computation. A [`FutureMerger`]
//! completes one aggregate future after a dynamic number of
//! sub-operations have reported.

mod cell;
mod merger;

use thiserror::Error;

pub use self::cell::{AsyncFuture, Resolver};
pub use self::merger::FutureMerger;

/// Errors reported by [`AsyncFuture`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FutureError {
    /// The computation ended without producing a value.
    #[error("operation abandoned before producing a value")]
    Abandoned,
    /// A rerun was requested while the previous run was still in progress.
    #[error("future has not completed its current run")]
    NotDone,
    /// A bounded wait elapsed.
    #[error("future not resolved within {timeout_ms}ms")]
    Timeout {
        /// Bound that elapsed.
        timeout_ms: u64,
    },
}

/// Errors reported by [`FutureMerger`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MergerError {
    /// The aggregate already completed.
    #[error("merger already completed")]
    AlreadyCompleted,
    /// More sub-operations reported than were registered.
    #[error("sub-operation reported without a matching registration")]
    Unbalanced,
    /// [`FutureMerger::declare_complete`] was called twice.
    #[error("merger registration already closed")]
    AlreadyDeclared,
}
