//! In-process VM stand-in and other doubles shared by the test suites.
//!
//! [`FakeVm`] implements [`Transport`]: it decodes each request, records the
//! command and answers it straight back into the multiplexer on the sending
//! thread, unless told to hold, silence or reject it.

mod store;
mod world;

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use rstest::fixture;
use serde_json::{Value, json};

use crate::breakpoints::{
    BreakpointListing, CLEAR_BREAKPOINT, ClearBreakpointArguments, LIST_BREAKPOINTS,
    RemoteBreakpointId, SET_BREAKPOINT, SetBreakpointArguments, SetBreakpointBody,
    WireBreakpoint,
};
use crate::events::EventRegistry;
use crate::multiplexer::CommandMultiplexer;
use crate::protocol::{Event, InboundMessage, RequestEnvelope, Response};
use crate::scripts::{SCRIPTS, Script};
use crate::transport::{Transport, TransportError};
use crate::values::{GET_PROPERTIES, Property};

pub(crate) use self::store::RecordingStore;
pub(crate) use self::world::{SyncWorld, new_world, parse_locations, unquote};

/// Scripted VM answering the debugger protocol in memory.
pub(crate) struct FakeVm {
    state: Arc<VmState>,
    mux: Arc<CommandMultiplexer>,
}

#[fixture]
pub(crate) fn fake_vm() -> FakeVm {
    FakeVm::new()
}

impl FakeVm {
    /// A VM wired to a fresh multiplexer and event registry.
    pub(crate) fn new() -> Self {
        let state = Arc::new(VmState::default());
        let transport: Arc<dyn Transport> = Arc::new(FakeTransport(Arc::clone(&state)));
        let mux = Arc::new(CommandMultiplexer::new(
            transport,
            Arc::new(EventRegistry::new()),
        ));
        state.attach(&mux);
        Self { state, mux }
    }

    /// The multiplexer this VM answers.
    pub(crate) fn multiplexer(&self) -> Arc<CommandMultiplexer> {
        Arc::clone(&self.mux)
    }

    /// Another transport onto the same VM, for multiplexers built elsewhere.
    /// Call [`FakeVm::attach`] with the resulting multiplexer.
    pub(crate) fn transport(&self) -> Arc<dyn Transport> {
        Arc::new(FakeTransport(Arc::clone(&self.state)))
    }

    /// Sends replies and events to `mux` from now on.
    pub(crate) fn attach(&self, mux: &Arc<CommandMultiplexer>) {
        self.state.attach(mux);
    }

    /// Every command received, in order.
    pub(crate) fn commands(&self) -> Vec<String> {
        self.state.lock().commands.clone()
    }

    /// How many times `command` was received.
    pub(crate) fn count(&self, command: &str) -> usize {
        self.state
            .lock()
            .commands
            .iter()
            .filter(|seen| *seen == command)
            .count()
    }

    /// Answers `command` with a failure carrying `message`.
    pub(crate) fn reject_command(&self, command: &str, message: &str) {
        self.state
            .lock()
            .rejections
            .insert(command.to_owned(), message.to_owned());
    }

    /// Never answers `command`.
    pub(crate) fn silence_command(&self, command: &str) {
        self.state.lock().silenced.insert(command.to_owned());
    }

    /// Queues replies instead of delivering them.
    pub(crate) fn hold_replies(&self) {
        self.state.lock().holding = true;
    }

    /// Delivers every queued reply in arrival order and resumes immediate
    /// delivery. Returns how many were delivered.
    pub(crate) fn deliver_all(&self) -> usize {
        let held: Vec<Vec<u8>> = {
            let mut inner = self.state.lock();
            inner.holding = false;
            inner.held.drain(..).collect()
        };
        for reply in &held {
            self.state.deliver(reply);
        }
        held.len()
    }

    /// Delivers queued replies newest first, keeping replies held.
    pub(crate) fn deliver_reversed(&self) -> usize {
        let held: Vec<Vec<u8>> = self.state.lock().held.drain(..).rev().collect();
        for reply in &held {
            self.state.deliver(reply);
        }
        held.len()
    }

    /// Makes every later write fail.
    pub(crate) fn disconnect(&self) {
        self.state.lock().disconnected = true;
    }

    /// Pushes an unsolicited event.
    pub(crate) fn emit(&self, event: Event) {
        let payload = InboundMessage::Event(event)
            .to_bytes()
            .expect("events encode");
        self.state.deliver(&payload);
    }

    /// Adds a breakpoint set in script `name` and returns its id.
    pub(crate) fn add_breakpoint(&self, name: &str, line: u32) -> RemoteBreakpointId {
        let mut inner = self.state.lock();
        let number = inner.next_breakpoint_number();
        inner.breakpoints.insert(
            number,
            WireBreakpoint {
                number,
                kind: String::from("scriptName"),
                script_name: Some(name.to_owned()),
                script_id: None,
                line,
                active: true,
                condition: None,
            },
        );
        RemoteBreakpointId(number)
    }

    /// Adds a breakpoint on a function, which has no script resource.
    pub(crate) fn add_function_breakpoint(&self) -> RemoteBreakpointId {
        let mut inner = self.state.lock();
        let number = inner.next_breakpoint_number();
        inner.breakpoints.insert(
            number,
            WireBreakpoint {
                number,
                kind: String::from("function"),
                script_name: None,
                script_id: None,
                line: 0,
                active: true,
                condition: None,
            },
        );
        RemoteBreakpointId(number)
    }

    /// `(script name, line)` of every script breakpoint, sorted.
    pub(crate) fn breakpoint_locations(&self) -> Vec<(String, u32)> {
        let mut locations: Vec<(String, u32)> = self
            .state
            .lock()
            .breakpoints
            .values()
            .filter_map(|bp| bp.script_name.clone().map(|name| (name, bp.line)))
            .collect();
        locations.sort();
        locations
    }

    /// Makes `script` part of the `scripts` listing.
    pub(crate) fn add_script(&self, script: Script) {
        self.state.lock().scripts.push(script);
    }

    /// Answers `getProperties` for `object_id` with `properties`.
    pub(crate) fn set_properties(&self, object_id: &str, properties: Vec<Property>) {
        self.state
            .lock()
            .properties
            .insert(object_id.to_owned(), properties);
    }
}

#[derive(Default)]
struct VmState {
    target: Mutex<Weak<CommandMultiplexer>>,
    inner: Mutex<VmInner>,
}

impl VmState {
    fn lock(&self) -> MutexGuard<'_, VmInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn attach(&self, mux: &Arc<CommandMultiplexer>) {
        *self.target.lock().unwrap_or_else(PoisonError::into_inner) = Arc::downgrade(mux);
    }

    fn deliver(&self, payload: &[u8]) {
        let target = self
            .target
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .upgrade();
        if let Some(mux) = target {
            mux.accept_inbound(payload);
        }
    }
}

#[derive(Default)]
struct VmInner {
    commands: Vec<String>,
    rejections: HashMap<String, String>,
    silenced: HashSet<String>,
    holding: bool,
    held: VecDeque<Vec<u8>>,
    disconnected: bool,
    breakpoints: BTreeMap<u64, WireBreakpoint>,
    last_breakpoint: u64,
    scripts: Vec<Script>,
    properties: HashMap<String, Vec<Property>>,
}

impl VmInner {
    fn next_breakpoint_number(&mut self) -> u64 {
        self.last_breakpoint += 1;
        self.last_breakpoint
    }

    fn answer(&mut self, request: &RequestEnvelope) -> Response {
        let seq = request.seq;
        let command = request.command.as_str();
        if let Some(message) = self.rejections.get(command) {
            return Response::failure(seq, command, message.clone());
        }
        let arguments = request.arguments.clone().unwrap_or(Value::Null);
        match command {
            "version" => Response::success(seq, command, json!({"V8Version": "3.14.5"})),
            LIST_BREAKPOINTS => {
                let listing = BreakpointListing {
                    breakpoints: self.breakpoints.values().cloned().collect(),
                };
                Response::success(seq, command, json!(listing))
            }
            SET_BREAKPOINT => {
                let set: SetBreakpointArguments =
                    serde_json::from_value(arguments).expect("setbreakpoint arguments");
                let number = self.next_breakpoint_number();
                let by_name = set.kind == "script";
                self.breakpoints.insert(
                    number,
                    WireBreakpoint {
                        number,
                        kind: String::from(if by_name { "scriptName" } else { "scriptId" }),
                        script_name: set.target.as_str().map(str::to_owned),
                        script_id: set.target.as_u64(),
                        line: set.line,
                        active: set.enabled,
                        condition: set.condition,
                    },
                );
                Response::success(seq, command, json!(SetBreakpointBody { breakpoint: number }))
            }
            CLEAR_BREAKPOINT => {
                let clear: ClearBreakpointArguments =
                    serde_json::from_value(arguments).expect("clearbreakpoint arguments");
                match self.breakpoints.remove(&clear.breakpoint) {
                    Some(_) => Response::success(seq, command, json!({"breakpoint": clear.breakpoint})),
                    None => Response::failure(
                        seq,
                        command,
                        format!("no breakpoint {}", clear.breakpoint),
                    ),
                }
            }
            SCRIPTS => Response::success(seq, command, self.list_scripts(&arguments)),
            GET_PROPERTIES => {
                let object_id = arguments
                    .get("objectId")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                match self.properties.get(object_id) {
                    Some(properties) => {
                        Response::success(seq, command, json!({"properties": properties}))
                    }
                    None => Response::failure(seq, command, format!("no object {object_id}")),
                }
            }
            _ => Response::success(seq, command, Value::Null),
        }
    }

    fn list_scripts(&self, arguments: &Value) -> Value {
        let ids: Option<Vec<u64>> = arguments
            .get("ids")
            .and_then(Value::as_array)
            .map(|ids| ids.iter().filter_map(Value::as_u64).collect());
        let with_source = arguments
            .get("includeSource")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let scripts: Vec<Script> = self
            .scripts
            .iter()
            .filter(|script| ids.as_ref().is_none_or(|wanted| wanted.contains(&script.id)))
            .map(|script| Script {
                source: script.source.clone().filter(|_| with_source),
                ..script.clone()
            })
            .collect();
        json!(scripts)
    }
}

struct FakeTransport(Arc<VmState>);

impl Transport for FakeTransport {
    fn send_bytes(&self, payload: &[u8]) -> Result<(), TransportError> {
        let request: RequestEnvelope = serde_json::from_slice(payload)
            .map_err(|error| TransportError::Io(io::Error::new(io::ErrorKind::InvalidData, error)))?;
        let reply = {
            let mut inner = self.0.lock();
            if inner.disconnected {
                return Err(TransportError::Io(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "fake VM disconnected",
                )));
            }
            inner.commands.push(request.command.clone());
            if inner.silenced.contains(&request.command) {
                return Ok(());
            }
            let response = inner.answer(&request);
            let encoded = InboundMessage::Response(response)
                .to_bytes()
                .expect("responses encode");
            if inner.holding {
                inner.held.push_back(encoded);
                return Ok(());
            }
            encoded
        };
        self.0.deliver(&reply);
        Ok(())
    }
}
