//! Fan-in of a dynamic number of sub-operations into one future.

use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::error;

use super::{AsyncFuture, MergerError, Resolver};
use crate::relay::{CallbackFailure, Relay};

/// Log target for merger bookkeeping.
const MERGER_TARGET: &str = "tether::future::merger";

struct MergerState<T: Clone + Send + 'static> {
    outstanding: usize,
    declared: bool,
    results: Vec<T>,
    resolver: Option<Resolver<Vec<T>>>,
}

/// Completes an aggregate future once every registered sub-operation has
/// reported and registration has been closed.
///
/// Register each sub-operation with [`FutureMerger::add_sub_operation`]
/// before starting it and report it with
/// [`FutureMerger::sub_operation_done`]. Call
/// [`FutureMerger::declare_complete`] once nothing more will be registered.
/// The aggregate resolves exactly once with the reported results in
/// completion order.
pub struct FutureMerger<T: Clone + Send + 'static> {
    future: AsyncFuture<Vec<T>>,
    state: Mutex<MergerState<T>>,
}

impl<T: Clone + Send + 'static> Default for FutureMerger<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> FutureMerger<T> {
    /// Creates a merger with no registered sub-operations.
    #[must_use]
    pub fn new() -> Self {
        let future = AsyncFuture::new();
        let mut resolver = None;
        let _started = future.initialize_running(|handle| resolver = Some(handle));
        Self {
            future,
            state: Mutex::new(MergerState {
                outstanding: 0,
                declared: false,
                results: Vec::new(),
                resolver,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MergerState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The aggregate future.
    #[must_use]
    pub fn future(&self) -> AsyncFuture<Vec<T>> {
        self.future.clone()
    }

    /// Registers one more sub-operation.
    ///
    /// # Errors
    ///
    /// Returns [`MergerError::AlreadyCompleted`] once the aggregate has
    /// resolved.
    pub fn add_sub_operation(&self) -> Result<(), MergerError> {
        let mut state = self.lock();
        if state.resolver.is_none() {
            return Err(MergerError::AlreadyCompleted);
        }
        state.outstanding += 1;
        Ok(())
    }

    /// Reports one registered sub-operation with its result.
    ///
    /// # Errors
    ///
    /// Returns [`MergerError::Unbalanced`] when no registered sub-operation
    /// is outstanding.
    pub fn sub_operation_done(&self, result: T) -> Result<(), MergerError> {
        let ready = {
            let mut state = self.lock();
            if state.outstanding == 0 {
                return Err(MergerError::Unbalanced);
            }
            state.outstanding -= 1;
            state.results.push(result);
            Self::take_if_ready(&mut state)
        };
        Self::resolve(ready);
        Ok(())
    }

    /// Closes registration. The aggregate resolves as soon as every
    /// registered sub-operation has reported, immediately if none are
    /// outstanding.
    ///
    /// # Errors
    ///
    /// Returns [`MergerError::AlreadyDeclared`] when called twice.
    pub fn declare_complete(&self) -> Result<(), MergerError> {
        let ready = {
            let mut state = self.lock();
            if state.declared {
                return Err(MergerError::AlreadyDeclared);
            }
            state.declared = true;
            Self::take_if_ready(&mut state)
        };
        Self::resolve(ready);
        Ok(())
    }

    /// Registers a sub-operation and returns a relay that reports it when
    /// fired. `finish` maps the relay's failure, if any, to the result.
    ///
    /// # Errors
    ///
    /// Returns [`MergerError::AlreadyCompleted`] once the aggregate has
    /// resolved.
    pub fn track<F>(self: &Arc<Self>, finish: F) -> Result<Relay, MergerError>
    where
        F: FnOnce(Option<CallbackFailure>) -> T + Send + 'static,
    {
        self.add_sub_operation()?;
        let merger = Arc::clone(self);
        Ok(Relay::new(move |failure| {
            if let Err(error) = merger.sub_operation_done(finish(failure)) {
                error!(target: MERGER_TARGET, error = %error, "tracked sub-operation unbalanced");
            }
        }))
    }

    /// Sub-operations registered and not yet reported.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.lock().outstanding
    }

    fn take_if_ready(state: &mut MergerState<T>) -> Option<(Resolver<Vec<T>>, Vec<T>)> {
        if !state.declared || state.outstanding > 0 {
            return None;
        }
        let resolver = state.resolver.take()?;
        Some((resolver, mem::take(&mut state.results)))
    }

    fn resolve(ready: Option<(Resolver<Vec<T>>, Vec<T>)>) {
        if let Some((resolver, results)) = ready {
            resolver.resolve(results);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use rstest::rstest;

    use super::*;

    #[rstest]
    fn resolves_after_every_sub_operation_and_declaration() {
        let merger = FutureMerger::new();
        for _ in 0..3 {
            assert_eq!(merger.add_sub_operation(), Ok(()));
        }
        assert_eq!(merger.declare_complete(), Ok(()));

        assert_eq!(merger.sub_operation_done(1), Ok(()));
        assert_eq!(merger.sub_operation_done(2), Ok(()));
        assert!(!merger.future().is_done());
        assert_eq!(merger.sub_operation_done(3), Ok(()));

        assert_eq!(merger.future().get_sync(), Ok(vec![1, 2, 3]));
    }

    #[rstest]
    fn empty_merger_resolves_on_declaration() {
        let merger = FutureMerger::<u8>::new();

        assert_eq!(merger.declare_complete(), Ok(()));

        assert_eq!(merger.future().get_sync(), Ok(Vec::new()));
        assert_eq!(merger.add_sub_operation(), Err(MergerError::AlreadyCompleted));
    }

    #[rstest]
    fn stays_open_until_declared() {
        let merger = FutureMerger::new();
        assert_eq!(merger.add_sub_operation(), Ok(()));
        assert_eq!(merger.sub_operation_done('a'), Ok(()));

        assert!(!merger.future().is_done());
        assert_eq!(merger.add_sub_operation(), Ok(()));
        assert_eq!(merger.declare_complete(), Ok(()));
        assert_eq!(merger.sub_operation_done('b'), Ok(()));

        assert_eq!(merger.future().get_sync(), Ok(vec!['a', 'b']));
    }

    #[rstest]
    fn extra_report_is_unbalanced() {
        let merger = FutureMerger::<u8>::new();

        assert_eq!(merger.sub_operation_done(0), Err(MergerError::Unbalanced));
        assert_eq!(merger.declare_complete(), Ok(()));
        assert_eq!(merger.declare_complete(), Err(MergerError::AlreadyDeclared));
    }

    #[rstest]
    fn tracked_relays_report_from_many_threads() {
        let merger = Arc::new(FutureMerger::new());
        let relays: Vec<_> = (0..16)
            .map(|_| merger.track(|failure| failure.is_none()).expect("track"))
            .collect();
        assert_eq!(merger.declare_complete(), Ok(()));

        let workers: Vec<_> = relays
            .into_iter()
            .map(|relay| {
                thread::spawn(move || {
                    let _accepted = relay.finish();
                })
            })
            .collect();
        for worker in workers {
            worker.join().expect("worker");
        }

        let results = merger.future().get_sync().expect("merged");
        assert_eq!(results.len(), 16);
        assert!(results.iter().all(|ok| *ok));
        assert_eq!(merger.outstanding(), 0);
    }

    #[rstest]
    fn abandoned_tracked_relay_reports_failure() {
        let merger = Arc::new(FutureMerger::new());
        let relay = merger.track(|failure| failure.is_some()).expect("track");
        assert_eq!(merger.declare_complete(), Ok(()));

        drop(relay);

        assert_eq!(merger.future().get_sync(), Ok(vec![true]));
    }
}
