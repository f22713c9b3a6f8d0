//! Breakpoint commands issued to the VM.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::model::{BreakpointSpec, RemoteBreakpoint, RemoteBreakpointId, ResourceRef};
use crate::chain::{Step, run_chain};
use crate::errors::CallError;
use crate::multiplexer::CommandMultiplexer;
use crate::protocol::Request;
use crate::relay::{Relay, RelayOk};

/// Command listing every breakpoint.
pub const LIST_BREAKPOINTS: &str = "listbreakpoints";
/// Command creating a breakpoint.
pub const SET_BREAKPOINT: &str = "setbreakpoint";
/// Command deleting a breakpoint.
pub const CLEAR_BREAKPOINT: &str = "clearbreakpoint";

const TARGET_SCRIPT_NAME: &str = "scriptName";
const TARGET_SCRIPT_ID: &str = "scriptId";
const SET_TARGET_SCRIPT: &str = "script";

/// Breakpoint entry in a `listbreakpoints` reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireBreakpoint {
    /// VM identifier.
    pub number: u64,
    /// Target kind: `scriptName`, `scriptId`, `scriptRegExp` or `function`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Script name for `scriptName` targets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_name: Option<String>,
    /// Script id for `scriptId` targets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_id: Option<u64>,
    /// Zero-based line.
    pub line: u32,
    /// Whether the breakpoint is enabled.
    #[serde(default = "active_by_default")]
    pub active: bool,
    /// Condition expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

const fn active_by_default() -> bool {
    true
}

impl WireBreakpoint {
    /// Converts to the matching model; targets other than scripts have no
    /// resource.
    #[must_use]
    pub fn into_remote(self) -> RemoteBreakpoint {
        let target = match self.kind.as_str() {
            TARGET_SCRIPT_NAME => self.script_name.map(ResourceRef::ScriptName),
            TARGET_SCRIPT_ID => self.script_id.map(ResourceRef::ScriptId),
            _ => None,
        };
        RemoteBreakpoint {
            id: RemoteBreakpointId(self.number),
            target,
            line: self.line,
            enabled: self.active,
            condition: self.condition,
        }
    }
}

/// Body of a `listbreakpoints` reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakpointListing {
    /// Every breakpoint the VM holds.
    #[serde(default)]
    pub breakpoints: Vec<WireBreakpoint>,
}

/// Arguments of `setbreakpoint`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetBreakpointArguments {
    /// `script` or `scriptId`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Script name or id.
    pub target: Value,
    /// Zero-based line.
    pub line: u32,
    /// Whether the breakpoint starts enabled.
    #[serde(default = "active_by_default")]
    pub enabled: bool,
    /// Condition expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl SetBreakpointArguments {
    fn from_spec(spec: &BreakpointSpec) -> Self {
        let (kind, target) = match &spec.key.resource {
            ResourceRef::ScriptName(name) => (SET_TARGET_SCRIPT, Value::from(name.clone())),
            ResourceRef::ScriptId(id) => (TARGET_SCRIPT_ID, Value::from(*id)),
        };
        Self {
            kind: kind.to_owned(),
            target,
            line: spec.key.line,
            enabled: spec.enabled,
            condition: spec.condition.clone(),
        }
    }
}

/// Body of a `setbreakpoint` reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetBreakpointBody {
    /// Identifier assigned by the VM.
    pub breakpoint: u64,
}

/// Arguments of `clearbreakpoint`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearBreakpointArguments {
    /// Identifier to clear.
    pub breakpoint: u64,
}

/// Breakpoint commands for one VM.
#[derive(Clone)]
pub struct VmBreakpoints {
    mux: Arc<CommandMultiplexer>,
}

impl VmBreakpoints {
    /// Issues commands through `mux`.
    #[must_use]
    pub const fn new(mux: Arc<CommandMultiplexer>) -> Self {
        Self { mux }
    }

    /// Lists every breakpoint the VM holds.
    pub fn list<F>(&self, on_result: F, completion: Relay) -> RelayOk
    where
        F: FnOnce(Result<Vec<RemoteBreakpoint>, CallError>) + Send + 'static,
    {
        let step = Step::send(Request::new(LIST_BREAKPOINTS, None), |response| {
            let listing: BreakpointListing = response.decode_body()?;
            Ok(Step::finish(
                listing
                    .breakpoints
                    .into_iter()
                    .map(WireBreakpoint::into_remote)
                    .collect(),
            ))
        });
        run_chain(&self.mux, step, on_result, completion)
    }

    /// Creates a breakpoint matching `spec`.
    pub fn create<F>(&self, spec: &BreakpointSpec, on_result: F, completion: Relay) -> RelayOk
    where
        F: FnOnce(Result<RemoteBreakpoint, CallError>) + Send + 'static,
    {
        let created = spec.clone();
        let arguments = SetBreakpointArguments::from_spec(spec);
        let step = match Request::with_arguments(SET_BREAKPOINT, &arguments) {
            Ok(request) => Step::send(request, move |response| {
                let body: SetBreakpointBody = response.decode_body()?;
                Ok(Step::finish(RemoteBreakpoint {
                    id: RemoteBreakpointId(body.breakpoint),
                    target: Some(created.key.resource),
                    line: created.key.line,
                    enabled: created.enabled,
                    condition: created.condition,
                }))
            }),
            Err(error) => {
                let failure = CallError::Protocol {
                    command: SET_BREAKPOINT.to_owned(),
                    message: error.to_string(),
                };
                on_result(Err(failure));
                return completion.finish();
            }
        };
        run_chain(&self.mux, step, on_result, completion)
    }

    /// Deletes breakpoint `id`.
    pub fn clear<F>(&self, id: RemoteBreakpointId, on_result: F, completion: Relay) -> RelayOk
    where
        F: FnOnce(Result<(), CallError>) + Send + 'static,
    {
        let arguments = serde_json::json!({ "breakpoint": id.0 });
        let step = Step::send(Request::new(CLEAR_BREAKPOINT, Some(arguments)), |response| {
            response.into_result()?;
            Ok(Step::finish(()))
        });
        run_chain(&self.mux, step, on_result, completion)
    }
}
