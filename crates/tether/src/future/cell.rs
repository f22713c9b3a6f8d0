//! Lazily started, single-assignment result cell.

use std::fmt;
use std::mem;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{error, warn};

use super::FutureError;
use crate::relay::{Relay, RelayOk, run_guarded};

/// Log target for future bookkeeping.
const FUTURE_TARGET: &str = "tether::future";

type Outcome<T> = Result<T, FutureError>;
type ValueCallback<T> = Box<dyn FnOnce(Outcome<T>) + Send>;

struct Observer<T> {
    on_value: ValueCallback<T>,
    completion: Relay,
}

impl<T> Observer<T> {
    fn deliver(self, outcome: Outcome<T>) {
        let Self {
            on_value,
            completion,
        } = self;
        let failure = run_guarded(move || on_value(outcome));
        if let Some(panic) = &failure {
            error!(target: FUTURE_TARGET, error = %panic, "future observer panicked");
        }
        completion.fire(failure);
    }
}

enum Phase<T> {
    Uninitialized,
    Running,
    Done(Outcome<T>),
}

struct Inner<T> {
    phase: Phase<T>,
    attempt: u64,
    observers: Vec<Observer<T>>,
}

struct Shared<T> {
    inner: Mutex<Inner<T>>,
    resolved: Condvar,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A value computed at most once per run and shared by every observer.
///
/// The cell moves from uninitialized to running when the first caller
/// starts it, and from running to done when the operation's [`Resolver`]
/// fires. Observers registered before the result exists are queued and
/// notified in registration order, outside any lock.
pub struct AsyncFuture<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for AsyncFuture<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Default for AsyncFuture<T> {
    fn default() -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    phase: Phase::Uninitialized,
                    attempt: 0,
                    observers: Vec::new(),
                }),
                resolved: Condvar::new(),
            }),
        }
    }
}

impl<T> fmt::Debug for AsyncFuture<T> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.lock();
        let phase = match inner.phase {
            Phase::Uninitialized => "uninitialized",
            Phase::Running => "running",
            Phase::Done(_) => "done",
        };
        formatter
            .debug_struct("AsyncFuture")
            .field("phase", &phase)
            .field("attempt", &inner.attempt)
            .finish()
    }
}

impl<T: Clone + Send + 'static> AsyncFuture<T> {
    /// Creates an uninitialized cell.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts `operation` if the cell is uninitialized. Exactly one of any
    /// number of concurrent callers wins and runs its operation; the rest
    /// return `false` without running theirs.
    pub fn initialize_running<F>(&self, operation: F) -> bool
    where
        F: FnOnce(Resolver<T>),
    {
        let attempt = {
            let mut inner = self.shared.lock();
            if !matches!(inner.phase, Phase::Uninitialized) {
                return false;
            }
            inner.attempt += 1;
            inner.phase = Phase::Running;
            inner.attempt
        };
        operation(Resolver::new(Arc::clone(&self.shared), attempt));
        true
    }

    /// Resolves an uninitialized cell to `value` without running anything.
    pub fn initialize_trivial(&self, value: T) -> bool {
        let observers = {
            let mut inner = self.shared.lock();
            if !matches!(inner.phase, Phase::Uninitialized) {
                return false;
            }
            inner.attempt += 1;
            inner.phase = Phase::Done(Ok(value.clone()));
            self.shared.resolved.notify_all();
            mem::take(&mut inner.observers)
        };
        for observer in observers {
            observer.deliver(Ok(value.clone()));
        }
        true
    }

    /// Starts a fresh run of a completed cell. Observers registered after
    /// this call see the new result.
    ///
    /// # Errors
    ///
    /// Returns [`FutureError::NotDone`] while the cell is uninitialized or
    /// its current run is still in progress.
    pub fn reinitialize_running<F>(&self, operation: F) -> Result<(), FutureError>
    where
        F: FnOnce(Resolver<T>),
    {
        let attempt = {
            let mut inner = self.shared.lock();
            if !matches!(inner.phase, Phase::Done(_)) {
                return Err(FutureError::NotDone);
            }
            inner.attempt += 1;
            inner.phase = Phase::Running;
            inner.attempt
        };
        operation(Resolver::new(Arc::clone(&self.shared), attempt));
        Ok(())
    }

    /// Delivers the result to `on_value` once it exists, then fires
    /// `completion`. Runs immediately on the calling thread when the result
    /// is already available.
    pub fn get_async<F>(&self, on_value: F, completion: Relay) -> RelayOk
    where
        F: FnOnce(Result<T, FutureError>) + Send + 'static,
    {
        let observer = Observer {
            on_value: Box::new(on_value),
            completion,
        };
        let ready = {
            let mut inner = self.shared.lock();
            let current = match &inner.phase {
                Phase::Done(outcome) => Some(outcome.clone()),
                Phase::Uninitialized | Phase::Running => None,
            };
            if current.is_none() {
                inner.observers.push(observer);
                return RelayOk::accepted();
            }
            current
        };
        if let Some(outcome) = ready {
            observer.deliver(outcome);
        }
        RelayOk::accepted()
    }

    /// Blocks until the result exists.
    ///
    /// Must not be called on the transport delivery thread: the result may
    /// depend on a reply that thread has yet to deliver.
    ///
    /// # Errors
    ///
    /// Returns [`FutureError::Abandoned`] when the run ended without a value.
    pub fn get_sync(&self) -> Result<T, FutureError> {
        let mut inner = self.shared.lock();
        loop {
            if let Phase::Done(outcome) = &inner.phase {
                return outcome.clone();
            }
            inner = self
                .shared
                .resolved
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Blocks until the result exists or `timeout` elapses.
    ///
    /// # Errors
    ///
    /// Returns [`FutureError::Timeout`] when the bound elapses and
    /// [`FutureError::Abandoned`] when the run ended without a value.
    pub fn get_sync_timeout(&self, timeout: Duration) -> Result<T, FutureError> {
        let guard = self.shared.lock();
        let (inner, _) = self
            .shared
            .resolved
            .wait_timeout_while(guard, timeout, |state| {
                !matches!(state.phase, Phase::Done(_))
            })
            .unwrap_or_else(PoisonError::into_inner);
        match &inner.phase {
            Phase::Done(outcome) => outcome.clone(),
            Phase::Uninitialized | Phase::Running => Err(FutureError::Timeout {
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    /// Current result, if any, without blocking.
    #[must_use]
    pub fn try_get(&self) -> Option<Result<T, FutureError>> {
        match &self.shared.lock().phase {
            Phase::Done(outcome) => Some(outcome.clone()),
            Phase::Uninitialized | Phase::Running => None,
        }
    }

    /// Whether the current run has produced its result.
    #[must_use]
    pub fn is_done(&self) -> bool {
        matches!(self.shared.lock().phase, Phase::Done(_))
    }

    /// Whether any run has been started.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        !matches!(self.shared.lock().phase, Phase::Uninitialized)
    }
}

/// Completes one run of an [`AsyncFuture`].
///
/// Dropping the resolver without calling [`Resolver::resolve`] completes the
/// run with [`FutureError::Abandoned`].
#[must_use = "an unresolved resolver abandons the future when dropped"]
pub struct Resolver<T: Clone + Send + 'static> {
    shared: Arc<Shared<T>>,
    attempt: u64,
    resolved: bool,
}

impl<T: Clone + Send + 'static> Resolver<T> {
    const fn new(shared: Arc<Shared<T>>, attempt: u64) -> Self {
        Self {
            shared,
            attempt,
            resolved: false,
        }
    }

    /// Stores `value` and notifies every queued observer.
    pub fn resolve(mut self, value: T) {
        self.resolved = true;
        self.settle(Ok(value));
    }

    fn settle(&self, outcome: Outcome<T>) {
        let observers = {
            let mut inner = self.shared.lock();
            if inner.attempt != self.attempt || !matches!(inner.phase, Phase::Running) {
                error!(
                    target: FUTURE_TARGET,
                    attempt = self.attempt,
                    current = inner.attempt,
                    "ignoring result from a stale run"
                );
                return;
            }
            inner.phase = Phase::Done(outcome.clone());
            self.shared.resolved.notify_all();
            mem::take(&mut inner.observers)
        };
        for observer in observers {
            observer.deliver(outcome.clone());
        }
    }
}

impl<T: Clone + Send + 'static> Drop for Resolver<T> {
    fn drop(&mut self) {
        if !self.resolved {
            warn!(
                target: FUTURE_TARGET,
                attempt = self.attempt,
                "future operation ended without a value"
            );
            self.settle(Err(FutureError::Abandoned));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Barrier, Mutex};
    use std::thread;

    use rstest::rstest;

    use super::*;

    fn recorder() -> (
        Arc<Mutex<Vec<Result<u32, FutureError>>>>,
        impl Fn() -> ValueCallback<u32>,
    ) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let make = move || -> ValueCallback<u32> {
            let log = Arc::clone(&sink);
            Box::new(move |outcome| log.lock().expect("log lock").push(outcome))
        };
        (seen, make)
    }

    #[rstest]
    fn queued_observers_see_value_in_order() {
        let future = AsyncFuture::<u32>::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for label in 0..3 {
            let log = Arc::clone(&order);
            let _accepted = future.get_async(
                move |outcome| log.lock().expect("order lock").push((label, outcome)),
                Relay::detached(),
            );
        }
        let mut pending = None;

        assert!(future.initialize_running(|resolver| pending = Some(resolver)));
        assert!(order.lock().expect("order lock").is_empty());
        pending.expect("resolver captured").resolve(9);

        assert_eq!(
            *order.lock().expect("order lock"),
            vec![(0, Ok(9)), (1, Ok(9)), (2, Ok(9))]
        );
    }

    #[rstest]
    fn late_observer_runs_immediately() {
        let future = AsyncFuture::new();
        assert!(future.initialize_trivial(4_u32));
        let (seen, make) = recorder();

        let _accepted = future.get_async(make(), Relay::detached());

        assert_eq!(*seen.lock().expect("log lock"), vec![Ok(4)]);
        assert!(!future.initialize_trivial(5));
        assert_eq!(future.get_sync(), Ok(4));
    }

    #[rstest]
    fn racing_initializers_run_one_operation() {
        let future = AsyncFuture::<u32>::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let cell = future.clone();
                let counter = Arc::clone(&runs);
                let gate = Arc::clone(&barrier);
                thread::spawn(move || {
                    gate.wait();
                    cell.initialize_running(|resolver| {
                        counter.fetch_add(1, Ordering::SeqCst);
                        resolver.resolve(1);
                    })
                })
            })
            .collect();
        let winners = workers
            .into_iter()
            .map(|worker| worker.join().expect("worker"))
            .filter(|won| *won)
            .count();

        assert_eq!(winners, 1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(future.get_sync(), Ok(1));
    }

    #[rstest]
    fn dropped_resolver_abandons_future() {
        let future = AsyncFuture::<u32>::new();
        let (seen, make) = recorder();
        let _accepted = future.get_async(make(), Relay::detached());

        assert!(future.initialize_running(drop));

        assert_eq!(*seen.lock().expect("log lock"), vec![Err(FutureError::Abandoned)]);
        assert_eq!(future.get_sync(), Err(FutureError::Abandoned));
    }

    #[rstest]
    fn reinitialize_requires_finished_run() {
        let future = AsyncFuture::<u32>::new();
        let mut pending = None;
        assert!(future.initialize_running(|resolver| pending = Some(resolver)));

        assert_eq!(
            future.reinitialize_running(|resolver| resolver.resolve(0)),
            Err(FutureError::NotDone)
        );

        pending.expect("resolver captured").resolve(1);
        assert_eq!(
            future.reinitialize_running(|resolver| resolver.resolve(2)),
            Ok(())
        );
        assert_eq!(future.get_sync(), Ok(2));
    }

    #[rstest]
    fn blocking_get_wakes_when_another_thread_resolves() {
        let future = AsyncFuture::<u32>::new();
        let mut pending = None;
        assert!(future.initialize_running(|resolver| pending = Some(resolver)));
        let resolver = pending.expect("resolver captured");

        let worker = thread::spawn(move || resolver.resolve(11));
        let value = future.get_sync_timeout(Duration::from_secs(5));
        worker.join().expect("worker");

        assert_eq!(value, Ok(11));
    }

    #[rstest]
    fn bounded_get_times_out() {
        let future = AsyncFuture::<u32>::new();

        assert_eq!(
            future.get_sync_timeout(Duration::from_millis(10)),
            Err(FutureError::Timeout { timeout_ms: 10 })
        );
        assert!(future.try_get().is_none());
    }

    #[rstest]
    fn observer_panic_reaches_its_completion_only() {
        let future = AsyncFuture::<u32>::new();
        let failures = Arc::new(Mutex::new(Vec::new()));
        let (seen, make) = recorder();
        let log = Arc::clone(&failures);
        let _accepted = future.get_async(
            |_| panic!("observer bug"),
            Relay::new(move |failure| log.lock().expect("failures lock").push(failure)),
        );
        let _accepted_second = future.get_async(make(), Relay::detached());

        assert!(future.initialize_trivial(3));

        let reported = failures.lock().expect("failures lock");
        assert_eq!(reported.len(), 1);
        assert!(reported.first().is_some_and(Option::is_some));
        assert_eq!(*seen.lock().expect("log lock"), vec![Ok(3)]);
    }
}
