use std::collections::HashMap;

use super::model::{LocalBreakpointId, RemoteBreakpointId};

/// One-to-one links between remote and local breakpoints that survive
/// across synchronization runs.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LinkMap {
    by_remote: HashMap<RemoteBreakpointId, LocalBreakpointId>,
    by_local: HashMap<LocalBreakpointId, RemoteBreakpointId>,
}

impl LinkMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Links `remote` with `local`, dropping any earlier link either had.
    pub fn link(&mut self, remote: RemoteBreakpointId, local: LocalBreakpointId) {
        self.unlink_remote(remote);
        self.unlink_local(local);
        self.by_remote.insert(remote, local);
        self.by_local.insert(local, remote);
    }

    /// Local counterpart of `remote`.
    #[must_use]
    pub fn local_for(&self, remote: RemoteBreakpointId) -> Option<LocalBreakpointId> {
        self.by_remote.get(&remote).copied()
    }

    /// Remote counterpart of `local`.
    #[must_use]
    pub fn remote_for(&self, local: LocalBreakpointId) -> Option<RemoteBreakpointId> {
        self.by_local.get(&local).copied()
    }

    /// Removes the link held by `remote`.
    pub fn unlink_remote(&mut self, remote: RemoteBreakpointId) {
        if let Some(local) = self.by_remote.remove(&remote) {
            self.by_local.remove(&local);
        }
    }

    /// Removes the link held by `local`.
    pub fn unlink_local(&mut self, local: LocalBreakpointId) {
        if let Some(remote) = self.by_local.remove(&local) {
            self.by_remote.remove(&remote);
        }
    }

    /// Forgets every link.
    pub fn clear(&mut self) {
        self.by_remote.clear();
        self.by_local.clear();
    }

    /// Number of linked pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_remote.len()
    }

    /// Whether no pair is linked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_remote.is_empty()
    }
}
