//! Breakpoint reconciliation between the editor and the VM.
//!
//! The [`BreakpointSynchronizer`] matches local breakpoints against the VM's
//! by (resource, line), keeps the matches in a [`LinkMap`] that persists
//! across runs, and creates or deletes breakpoints on either side according
//! to the run's [`Direction`].

mod links;
mod model;
mod plan;
mod remote;
mod report;
mod store;
mod sync;

pub use self::links::LinkMap;
pub use self::model::{
    BreakpointKey, BreakpointSpec, Direction, LocalBreakpoint, LocalBreakpointId,
    RemoteBreakpoint, RemoteBreakpointId, ResourceRef,
};
pub use self::plan::{SyncPlan, plan_sync};
pub use self::remote::{
    BreakpointListing, CLEAR_BREAKPOINT, ClearBreakpointArguments, LIST_BREAKPOINTS,
    SET_BREAKPOINT, SetBreakpointArguments, SetBreakpointBody, VmBreakpoints, WireBreakpoint,
};
pub use self::report::{ActionFailure, Counter, SyncAction, SyncError, SyncReport, SyncStatus};
pub use self::store::{LocalBreakpointStore, StoreError};
pub use self::sync::BreakpointSynchronizer;
