//! One reconciliation run between the local store and the VM.
//!
//! A run reads both sides, plans with [`plan_sync`], then issues every
//! delete followed by every create without waiting between them. Each
//! action is tracked by one [`FutureMerger`] sub-operation, and the run's
//! status is produced once the merger resolves. Failed actions are
//! collected rather than short-circuiting the run.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, error, info, warn};

use super::links::LinkMap;
use super::model::{Direction, LocalBreakpoint, RemoteBreakpoint};
use super::plan::plan_sync;
use super::remote::VmBreakpoints;
use super::report::{ActionFailure, Counter, SyncAction, SyncError, SyncReport, SyncStatus};
use super::store::LocalBreakpointStore;
use crate::future::FutureMerger;
use crate::relay::{Guard, Relay, RelayOk};

/// Log target for breakpoint reconciliation.
const SYNC_TARGET: &str = "tether::breakpoints::sync";

type ActionOutcome = Option<ActionFailure>;

/// Failure cause recorded by an action's result callback, read when the
/// action's relay fires.
#[derive(Clone, Default)]
struct FailureSlot(Arc<Mutex<Option<String>>>);

impl FailureSlot {
    fn record(&self, cause: impl ToString) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = Some(cause.to_string());
    }

    fn take(&self) -> Option<String> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

/// Reconciles one local store with one VM.
pub struct BreakpointSynchronizer {
    remote: VmBreakpoints,
    local: Arc<dyn LocalBreakpointStore>,
    links: Arc<Mutex<LinkMap>>,
}

impl BreakpointSynchronizer {
    /// Creates a synchronizer sharing `links` with earlier runs.
    #[must_use]
    pub fn new(
        remote: VmBreakpoints,
        local: Arc<dyn LocalBreakpointStore>,
        links: Arc<Mutex<LinkMap>>,
    ) -> Self {
        Self {
            remote,
            local,
            links,
        }
    }

    /// Snapshot of the current links.
    #[must_use]
    pub fn links(&self) -> LinkMap {
        self.links
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Runs one reconciliation in `direction`.
    ///
    /// `on_status` receives the report, or every failed action, once all
    /// actions have finished; `completion` fires after it.
    pub fn sync<F>(&self, direction: Direction, on_status: F, completion: Relay) -> RelayOk
    where
        F: FnOnce(SyncStatus) + Send + 'static,
    {
        if direction != Direction::Merge {
            self.links
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
        }
        let run = Arc::new(SyncRun {
            direction,
            remote: self.remote.clone(),
            local: Arc::clone(&self.local),
            links: Arc::clone(&self.links),
            report: Mutex::new(SyncReport::new(direction)),
            merger: Arc::new(FutureMerger::new()),
        });

        let finishing = Arc::clone(&run);
        let accepted = run.merger.future().get_async(
            move |outcomes| finishing.finish(outcomes.unwrap_or_default(), on_status),
            completion,
        );

        let local = self.local.breakpoints();
        if let Some((failure, read_relay)) = run.track(SyncAction::ReadRemote) {
            let guard = Guard::new(read_relay);
            let read_completion = guard.completion();
            let planning = Arc::clone(&run);
            let _listing = self.remote.list(
                move |listed| match listed {
                    Ok(remote) => {
                        let _planned =
                            guard.discharge(|owed| planning.apply(local, remote, owed));
                    }
                    Err(error) => failure.record(error),
                },
                read_completion,
            );
        }
        if let Err(error) = run.merger.declare_complete() {
            error!(target: SYNC_TARGET, error = %error, "run registration closed twice");
        }
        accepted
    }
}

struct SyncRun {
    direction: Direction,
    remote: VmBreakpoints,
    local: Arc<dyn LocalBreakpointStore>,
    links: Arc<Mutex<LinkMap>>,
    report: Mutex<SyncReport>,
    merger: Arc<FutureMerger<ActionOutcome>>,
}

impl SyncRun {
    fn track(&self, action: SyncAction) -> Option<(FailureSlot, Relay)> {
        let slot = FailureSlot::default();
        let recorded = slot.clone();
        match self.merger.track(move |callback_failure| {
            recorded
                .take()
                .or_else(|| callback_failure.map(|failure| failure.to_string()))
                .map(|cause| ActionFailure { action, cause })
        }) {
            Ok(relay) => Some((slot, relay)),
            Err(error) => {
                error!(target: SYNC_TARGET, error = %error, "action tracked after run completed");
                None
            }
        }
    }

    fn count(&self, counter: Counter, amount: usize) {
        self.report
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .add(counter, amount);
    }

    fn with_links<R>(&self, update: impl FnOnce(&mut LinkMap) -> R) -> R {
        update(&mut self.links.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn apply(
        self: &Arc<Self>,
        local: Vec<LocalBreakpoint>,
        remote: Vec<RemoteBreakpoint>,
        owed: Relay,
    ) -> RelayOk {
        let plan = self.with_links(|links| plan_sync(self.direction, local, remote, links));
        info!(
            target: SYNC_TARGET,
            direction = %self.direction,
            already_linked = plan.already_linked,
            newly_linked = plan.link.len(),
            actions = plan.action_count(),
            "planned breakpoint synchronization"
        );
        {
            let mut report = self.report.lock().unwrap_or_else(PoisonError::into_inner);
            report.add(Counter::Linked, plan.already_linked + plan.link.len());
            for problem in &plan.problems {
                report.add_problem(problem.clone());
            }
        }
        self.with_links(|links| {
            for (remote_id, local_id) in &plan.link {
                links.link(*remote_id, *local_id);
            }
        });

        for bp in &plan.delete_remote {
            self.delete_remote(bp);
        }
        for bp in &plan.delete_local {
            self.delete_local(bp);
        }
        for bp in &plan.create_remote {
            self.create_remote(bp);
        }
        for bp in &plan.create_local {
            self.create_local(bp);
        }
        owed.finish()
    }

    fn delete_remote(self: &Arc<Self>, bp: &RemoteBreakpoint) {
        let Some((failure, relay)) = self.track(SyncAction::DeleteRemote(bp.id)) else {
            return;
        };
        let run = Arc::clone(self);
        let remote_id = bp.id;
        let _accepted = self.remote.clear(
            remote_id,
            move |outcome| match outcome {
                Ok(()) => {
                    run.with_links(|links| links.unlink_remote(remote_id));
                    run.count(Counter::DeletedOnRemote, 1);
                }
                Err(error) => failure.record(error),
            },
            relay,
        );
    }

    fn delete_local(&self, bp: &LocalBreakpoint) {
        let Some((failure, relay)) = self.track(SyncAction::DeleteLocal(bp.id)) else {
            return;
        };
        match self.local.delete(bp.id) {
            Ok(()) => {
                self.with_links(|links| links.unlink_local(bp.id));
                self.count(Counter::DeletedLocally, 1);
            }
            Err(error) => failure.record(error),
        }
        relay.fire(None);
    }

    fn create_remote(self: &Arc<Self>, bp: &LocalBreakpoint) {
        let Some(spec) = bp.spec() else {
            return;
        };
        let Some((failure, relay)) = self.track(SyncAction::CreateRemote(spec.key.clone())) else {
            return;
        };
        let run = Arc::clone(self);
        let local_id = bp.id;
        let _accepted = self.remote.create(
            &spec,
            move |outcome| match outcome {
                Ok(created) => {
                    run.with_links(|links| links.link(created.id, local_id));
                    run.count(Counter::CreatedOnRemote, 1);
                }
                Err(error) => failure.record(error),
            },
            relay,
        );
    }

    fn create_local(&self, bp: &RemoteBreakpoint) {
        let Some(spec) = bp.spec() else {
            return;
        };
        let Some((failure, relay)) = self.track(SyncAction::CreateLocal(spec.key.clone())) else {
            return;
        };
        match self.local.create(&spec) {
            Ok(local_id) => {
                self.with_links(|links| links.link(bp.id, local_id));
                self.count(Counter::CreatedLocally, 1);
            }
            Err(error) => failure.record(error),
        }
        relay.fire(None);
    }

    fn finish<F>(&self, outcomes: Vec<ActionOutcome>, on_status: F)
    where
        F: FnOnce(SyncStatus),
    {
        let report = self
            .report
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let failures: Vec<ActionFailure> = outcomes.into_iter().flatten().collect();
        if failures.is_empty() {
            info!(target: SYNC_TARGET, report = %report, "breakpoint synchronization done");
            on_status(Ok(report));
        } else {
            for failure in &failures {
                warn!(target: SYNC_TARGET, failure = %failure, "breakpoint action failed");
            }
            let status = SyncError { failures, report };
            debug!(target: SYNC_TARGET, status = %status, "breakpoint synchronization failed");
            on_status(Err(status));
        }
    }
}
