//! Breakpoint records on both sides of the reconciliation.

use std::fmt;

use tether_config::SyncDirectionSetting;

/// Where a breakpoint applies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceRef {
    /// A script identified by its name or URL.
    ScriptName(String),
    /// A script identified by the VM's numeric id.
    ScriptId(u64),
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ScriptName(name) => write!(formatter, "script {name}"),
            Self::ScriptId(id) => write!(formatter, "script #{id}"),
        }
    }
}

/// Identity used to match a local breakpoint with a remote one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BreakpointKey {
    /// Resource the breakpoint is set in.
    pub resource: ResourceRef,
    /// Zero-based line number.
    pub line: u32,
}

impl fmt::Display for BreakpointKey {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{} line {}", self.resource, self.line)
    }
}

/// Identifier of a breakpoint in the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalBreakpointId(pub u64);

/// Identifier the VM assigned to a breakpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RemoteBreakpointId(pub u64);

impl fmt::Display for LocalBreakpointId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "local#{}", self.0)
    }
}

impl fmt::Display for RemoteBreakpointId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "remote#{}", self.0)
    }
}

/// Everything needed to create a breakpoint on either side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakpointSpec {
    /// Resource and line.
    pub key: BreakpointKey,
    /// Whether the breakpoint is active.
    pub enabled: bool,
    /// Optional condition expression.
    pub condition: Option<String>,
}

/// A breakpoint held by the editor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalBreakpoint {
    /// Store identifier.
    pub id: LocalBreakpointId,
    /// Resource, when the breakpoint's file maps onto one.
    pub resource: Option<ResourceRef>,
    /// Zero-based line number.
    pub line: u32,
    /// Whether the breakpoint is active.
    pub enabled: bool,
    /// Optional condition expression.
    pub condition: Option<String>,
}

impl LocalBreakpoint {
    /// Matching key, absent when the breakpoint has no resource.
    #[must_use]
    pub fn key(&self) -> Option<BreakpointKey> {
        self.resource.clone().map(|resource| BreakpointKey {
            resource,
            line: self.line,
        })
    }

    /// Creation spec for a remote counterpart.
    #[must_use]
    pub fn spec(&self) -> Option<BreakpointSpec> {
        self.key().map(|key| BreakpointSpec {
            key,
            enabled: self.enabled,
            condition: self.condition.clone(),
        })
    }
}

/// A breakpoint held by the VM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteBreakpoint {
    /// VM identifier.
    pub id: RemoteBreakpointId,
    /// Target, when it is expressible as a resource.
    pub target: Option<ResourceRef>,
    /// Zero-based line number.
    pub line: u32,
    /// Whether the breakpoint is active.
    pub enabled: bool,
    /// Optional condition expression.
    pub condition: Option<String>,
}

impl RemoteBreakpoint {
    /// Matching key, absent when the target is not a resource.
    #[must_use]
    pub fn key(&self) -> Option<BreakpointKey> {
        self.target.clone().map(|resource| BreakpointKey {
            resource,
            line: self.line,
        })
    }

    /// Creation spec for a local counterpart.
    #[must_use]
    pub fn spec(&self) -> Option<BreakpointSpec> {
        self.key().map(|key| BreakpointSpec {
            key,
            enabled: self.enabled,
            condition: self.condition.clone(),
        })
    }
}

/// Which side wins a reconciliation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// The VM is made to mirror the local set.
    ResetRemote,
    /// The local set is made to mirror the VM.
    ResetLocal,
    /// Matching breakpoints are linked and missing ones created on both
    /// sides; nothing is deleted.
    Merge,
}

impl Direction {
    /// Label used in reports.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::ResetRemote => "reset_remote",
            Self::ResetLocal => "reset_local",
            Self::Merge => "merge",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.label())
    }
}

impl From<SyncDirectionSetting> for Direction {
    fn from(setting: SyncDirectionSetting) -> Self {
        match setting {
            SyncDirectionSetting::ResetRemote => Self::ResetRemote,
            SyncDirectionSetting::ResetLocal => Self::ResetLocal,
            SyncDirectionSetting::Merge => Self::Merge,
        }
    }
}
