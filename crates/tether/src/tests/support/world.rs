//! Scenario world for the breakpoint synchronization behaviour suite.

use std::cell::RefCell;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

use tether_config::SyncDirectionSetting;

use crate::breakpoints::{
    BreakpointSynchronizer, Direction, LinkMap, LocalBreakpointStore, SyncStatus, VmBreakpoints,
};
use crate::relay::Relay;

use super::{FakeVm, RecordingStore};

/// A fake VM, an editor store and the synchronizer between them.
pub(crate) struct SyncWorld {
    pub(crate) vm: FakeVm,
    pub(crate) store: Arc<RecordingStore>,
    synchronizer: BreakpointSynchronizer,
    status: Arc<Mutex<Option<SyncStatus>>>,
}

impl SyncWorld {
    pub(crate) fn new() -> Self {
        let vm = FakeVm::new();
        let store = Arc::new(RecordingStore::default());
        let synchronizer = BreakpointSynchronizer::new(
            VmBreakpoints::new(vm.multiplexer()),
            Arc::clone(&store) as Arc<dyn LocalBreakpointStore>,
            Arc::new(Mutex::new(LinkMap::new())),
        );
        Self {
            vm,
            store,
            synchronizer,
            status: Arc::new(Mutex::new(None)),
        }
    }

    /// Runs one synchronization; `direction` uses the configuration
    /// spelling (`merge`, `reset_local`, `reset_remote`).
    pub(crate) fn synchronize(&self, direction: &str) -> Result<(), String> {
        let setting = SyncDirectionSetting::from_str(unquote(direction))
            .map_err(|error| format!("invalid direction '{direction}': {error}"))?;
        let slot = Arc::clone(&self.status);
        let _accepted = self.synchronizer.sync(
            Direction::from(setting),
            move |status| {
                *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(status);
            },
            Relay::detached(),
        );
        Ok(())
    }

    /// Status of the last run.
    pub(crate) fn status(&self) -> Option<SyncStatus> {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn links(&self) -> LinkMap {
        self.synchronizer.links()
    }
}

/// Parses `a.js:1, b.js:5` into sorted `(script, line)` pairs.
pub(crate) fn parse_locations(text: &str) -> Result<Vec<(String, u32)>, String> {
    let body = unquote(text);
    if body.is_empty() || body == "none" {
        return Ok(Vec::new());
    }
    let mut locations = body
        .split(',')
        .map(|entry| {
            let (script, line) = entry
                .trim()
                .rsplit_once(':')
                .ok_or_else(|| format!("location '{entry}' lacks a line"))?;
            let number = line
                .parse::<u32>()
                .map_err(|error| format!("bad line in '{entry}': {error}"))?;
            Ok((script.to_owned(), number))
        })
        .collect::<Result<Vec<_>, String>>()?;
    locations.sort();
    Ok(locations)
}

pub(crate) fn unquote(text: &str) -> &str {
    text.trim().trim_matches('"')
}

/// Fresh world for one scenario.
pub(crate) fn new_world() -> RefCell<SyncWorld> {
    RefCell::new(SyncWorld::new())
}
