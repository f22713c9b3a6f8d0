//! In-memory local breakpoint store.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::breakpoints::{
    BreakpointSpec, LocalBreakpoint, LocalBreakpointId, LocalBreakpointStore, ResourceRef,
    StoreError,
};

/// Store recording every change applied by the synchronizer.
#[derive(Default)]
pub(crate) struct RecordingStore {
    state: Mutex<StoreState>,
}

#[derive(Default)]
struct StoreState {
    breakpoints: BTreeMap<LocalBreakpointId, LocalBreakpoint>,
    last_id: u64,
    refusal: Option<String>,
    creates: usize,
    deletes: usize,
}

impl StoreState {
    fn insert(&mut self, resource: Option<ResourceRef>, line: u32) -> LocalBreakpointId {
        self.last_id += 1;
        let id = LocalBreakpointId(self.last_id);
        self.breakpoints.insert(
            id,
            LocalBreakpoint {
                id,
                resource,
                line,
                enabled: true,
                condition: None,
            },
        );
        id
    }
}

impl RecordingStore {
    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a breakpoint in script `name`.
    pub(crate) fn add(&self, name: &str, line: u32) -> LocalBreakpointId {
        self.lock()
            .insert(Some(ResourceRef::ScriptName(name.to_owned())), line)
    }

    /// Adds a breakpoint in a file the VM has no script for.
    pub(crate) fn add_unmapped(&self, line: u32) -> LocalBreakpointId {
        self.lock().insert(None, line)
    }

    /// Refuses every later create and delete with `message`.
    pub(crate) fn refuse_changes(&self, message: &str) {
        self.lock().refusal = Some(message.to_owned());
    }

    /// `(script name, line)` of every named breakpoint, sorted.
    pub(crate) fn locations(&self) -> Vec<(String, u32)> {
        let mut locations: Vec<(String, u32)> = self
            .lock()
            .breakpoints
            .values()
            .filter_map(|bp| match &bp.resource {
                Some(ResourceRef::ScriptName(name)) => Some((name.clone(), bp.line)),
                Some(ResourceRef::ScriptId(_)) | None => None,
            })
            .collect();
        locations.sort();
        locations
    }

    /// Successful creates and deletes so far.
    pub(crate) fn changes(&self) -> usize {
        let state = self.lock();
        state.creates + state.deletes
    }
}

impl LocalBreakpointStore for RecordingStore {
    fn breakpoints(&self) -> Vec<LocalBreakpoint> {
        self.lock().breakpoints.values().cloned().collect()
    }

    fn create(&self, spec: &BreakpointSpec) -> Result<LocalBreakpointId, StoreError> {
        let mut state = self.lock();
        if let Some(message) = &state.refusal {
            return Err(StoreError::Rejected {
                message: message.clone(),
            });
        }
        state.creates += 1;
        let id = state.insert(Some(spec.key.resource.clone()), spec.key.line);
        if let Some(created) = state.breakpoints.get_mut(&id) {
            created.enabled = spec.enabled;
            created.condition.clone_from(&spec.condition);
        }
        Ok(id)
    }

    fn delete(&self, id: LocalBreakpointId) -> Result<(), StoreError> {
        let mut state = self.lock();
        if let Some(message) = &state.refusal {
            return Err(StoreError::Rejected {
                message: message.clone(),
            });
        }
        state
            .breakpoints
            .remove(&id)
            .ok_or(StoreError::UnknownBreakpoint { id })?;
        state.deletes += 1;
        Ok(())
    }
}
