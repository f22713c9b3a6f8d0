//! Pure matching and action planning for one synchronization run.

use std::collections::BTreeMap;

use super::links::LinkMap;
use super::model::{
    BreakpointKey, Direction, LocalBreakpoint, LocalBreakpointId, RemoteBreakpoint,
    RemoteBreakpointId,
};

/// Actions computed for one run. Deletions are listed separately so they can
/// be issued before creations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPlan {
    /// Direction the plan was computed for.
    pub direction: Direction,
    /// Remote breakpoints already linked by an earlier run.
    pub already_linked: usize,
    /// Newly matched pairs to link.
    pub link: Vec<(RemoteBreakpointId, LocalBreakpointId)>,
    /// Remote breakpoints to delete.
    pub delete_remote: Vec<RemoteBreakpoint>,
    /// Local breakpoints to delete.
    pub delete_local: Vec<LocalBreakpoint>,
    /// Local breakpoints that need a remote counterpart.
    pub create_remote: Vec<LocalBreakpoint>,
    /// Remote breakpoints that need a local counterpart.
    pub create_local: Vec<RemoteBreakpoint>,
    /// Breakpoints skipped because they have no matching key.
    pub problems: Vec<String>,
}

impl SyncPlan {
    fn empty(direction: Direction) -> Self {
        Self {
            direction,
            already_linked: 0,
            link: Vec::new(),
            delete_remote: Vec::new(),
            delete_local: Vec::new(),
            create_remote: Vec::new(),
            create_local: Vec::new(),
            problems: Vec::new(),
        }
    }

    /// Number of creates and deletes in the plan.
    #[must_use]
    pub fn action_count(&self) -> usize {
        self.delete_remote.len()
            + self.delete_local.len()
            + self.create_remote.len()
            + self.create_local.len()
    }
}

/// Matches `local` against `remote` and plans the actions `direction`
/// requires.
///
/// Remote breakpoints already in `links` are skipped together with their
/// local partner. The rest are indexed by [`BreakpointKey`]; when several
/// breakpoints on one side share a key only the last is kept.
#[must_use]
pub fn plan_sync(
    direction: Direction,
    local: Vec<LocalBreakpoint>,
    remote: Vec<RemoteBreakpoint>,
    links: &LinkMap,
) -> SyncPlan {
    let mut plan = SyncPlan::empty(direction);
    let mut unlinked_local: BTreeMap<LocalBreakpointId, LocalBreakpoint> =
        local.into_iter().map(|bp| (bp.id, bp)).collect();

    let mut remote_index = BTreeMap::new();
    for bp in remote {
        if let Some(partner) = links.local_for(bp.id) {
            unlinked_local.remove(&partner);
            plan.already_linked += 1;
            continue;
        }
        match bp.key() {
            Some(key) => {
                remote_index.insert(key, bp);
            }
            None => plan
                .problems
                .push(format!("unresolved remote breakpoint {}", bp.id)),
        }
    }

    let mut local_index: BTreeMap<BreakpointKey, LocalBreakpoint> = BTreeMap::new();
    for bp in unlinked_local.into_values() {
        match bp.key() {
            Some(key) => {
                local_index.insert(key, bp);
            }
            None => plan
                .problems
                .push(format!("local breakpoint {} has no resource", bp.id)),
        }
    }

    let mut only_local = Vec::new();
    for (key, local_bp) in local_index {
        match remote_index.remove(&key) {
            Some(remote_bp) if direction == Direction::Merge => {
                plan.link.push((remote_bp.id, local_bp.id));
            }
            Some(remote_bp) => {
                only_local.push(local_bp);
                // Reset directions recreate matched pairs on the losing side.
                match direction {
                    Direction::ResetRemote => plan.delete_remote.push(remote_bp),
                    Direction::ResetLocal | Direction::Merge => {
                        plan.create_local.push(remote_bp);
                    }
                }
            }
            None => only_local.push(local_bp),
        }
    }
    let only_remote: Vec<RemoteBreakpoint> = remote_index.into_values().collect();

    match direction {
        Direction::ResetRemote => {
            plan.delete_remote.extend(only_remote);
            plan.create_remote = only_local;
        }
        Direction::ResetLocal => {
            plan.delete_local = only_local;
            plan.create_local.extend(only_remote);
        }
        Direction::Merge => {
            plan.create_remote = only_local;
            plan.create_local = only_remote;
        }
    }
    plan
}
