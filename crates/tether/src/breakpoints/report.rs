//! Outcome of a synchronization run.

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

use super::model::{BreakpointKey, Direction, LocalBreakpointId, RemoteBreakpointId};

/// Per-run action counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Counter {
    /// Pairs found linked or linked during the run.
    Linked,
    /// Local breakpoints created from remote ones.
    CreatedLocally,
    /// Local breakpoints deleted.
    DeletedLocally,
    /// Remote breakpoints created from local ones.
    CreatedOnRemote,
    /// Remote breakpoints deleted.
    DeletedOnRemote,
}

impl Counter {
    /// Label used when rendering a report.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Linked => "LINKED",
            Self::CreatedLocally => "CREATED_LOCALLY",
            Self::DeletedLocally => "DELETED_LOCALLY",
            Self::CreatedOnRemote => "CREATED_ON_REMOTE",
            Self::DeletedOnRemote => "DELETED_ON_REMOTE",
        }
    }
}

/// Counters and skipped items for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    direction: Direction,
    counts: BTreeMap<Counter, usize>,
    problems: Vec<String>,
}

impl SyncReport {
    /// Empty report for a run in `direction`.
    #[must_use]
    pub const fn new(direction: Direction) -> Self {
        Self {
            direction,
            counts: BTreeMap::new(),
            problems: Vec::new(),
        }
    }

    /// Direction of the run.
    #[must_use]
    pub const fn direction(&self) -> Direction {
        self.direction
    }

    /// Adds `amount` to `counter`.
    pub fn add(&mut self, counter: Counter, amount: usize) {
        if amount > 0 {
            *self.counts.entry(counter).or_insert(0) += amount;
        }
    }

    /// Value of `counter`.
    #[must_use]
    pub fn count(&self, counter: Counter) -> usize {
        self.counts.get(&counter).copied().unwrap_or(0)
    }

    /// Records an item skipped by the run.
    pub fn add_problem(&mut self, problem: impl Into<String>) {
        self.problems.push(problem.into());
    }

    /// Items skipped by the run.
    #[must_use]
    pub fn problems(&self) -> &[String] {
        &self.problems
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "direction={}", self.direction)?;
        for (counter, amount) in &self.counts {
            write!(formatter, " {}={amount}", counter.label())?;
        }
        if !self.problems.is_empty() {
            write!(formatter, " problems=[{}]", self.problems.join("; "))?;
        }
        Ok(())
    }
}

/// One planned step of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    /// Listing remote breakpoints and planning the run.
    ReadRemote,
    /// Deleting a remote breakpoint.
    DeleteRemote(RemoteBreakpointId),
    /// Deleting a local breakpoint.
    DeleteLocal(LocalBreakpointId),
    /// Creating a remote breakpoint.
    CreateRemote(BreakpointKey),
    /// Creating a local breakpoint.
    CreateLocal(BreakpointKey),
}

impl fmt::Display for SyncAction {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadRemote => formatter.write_str("read remote breakpoints"),
            Self::DeleteRemote(id) => write!(formatter, "delete {id}"),
            Self::DeleteLocal(id) => write!(formatter, "delete {id}"),
            Self::CreateRemote(key) => write!(formatter, "create remote breakpoint at {key}"),
            Self::CreateLocal(key) => write!(formatter, "create local breakpoint at {key}"),
        }
    }
}

/// A failed action and its cause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionFailure {
    /// What was attempted.
    pub action: SyncAction,
    /// Why it failed.
    pub cause: String,
}

impl fmt::Display for ActionFailure {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}: {}", self.action, self.cause)
    }
}

/// A run that completed with at least one failed action.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error(
    "breakpoint synchronization finished with {} error(s) ({report}){}",
    .failures.len(),
    render_failures(.failures)
)]
pub struct SyncError {
    /// Every failed action, in completion order.
    pub failures: Vec<ActionFailure>,
    /// Counters for the actions that did succeed.
    pub report: SyncReport,
}

fn render_failures(failures: &[ActionFailure]) -> String {
    failures
        .iter()
        .map(|failure| format!("; {failure}"))
        .collect()
}

/// Final status of a run.
pub type SyncStatus = Result<SyncReport, SyncError>;
