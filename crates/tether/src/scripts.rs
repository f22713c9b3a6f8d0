//! Scripts loaded in the VM.
//!
//! The catalog keeps the last `scripts` listing in an [`AsyncFuture`] and
//! folds in scripts announced by `afterCompile` events, so the editor can
//! resolve script ids without a round trip per lookup.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, warn};

use crate::chain::{Step, run_chain};
use crate::errors::CallError;
use crate::future::{AsyncFuture, FutureError, FutureMerger};
use crate::multiplexer::CommandMultiplexer;
use crate::protocol::{Event, Request};
use crate::relay::{Relay, RelayOk};

/// Command listing the VM's scripts.
pub const SCRIPTS: &str = "scripts";

/// Log target for the script catalog.
const SCRIPTS_TARGET: &str = "tether::scripts";

/// One script known to the VM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Script {
    /// VM-assigned script id.
    pub id: u64,
    /// Script name, usually a URL or file path. Eval'd code has none.
    #[serde(default)]
    pub name: Option<String>,
    /// Line of the enclosing resource the script starts at.
    #[serde(default)]
    pub line_offset: u32,
    /// Source text, present only when requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Shared script listing.
pub type ScriptList = Arc<Vec<Script>>;

/// Outcome of one listing.
pub type ScriptListResult = Result<ScriptList, CallError>;

#[derive(Deserialize)]
struct AfterCompileBody {
    script: Script,
}

/// Cached view of the VM's scripts.
pub struct ScriptCatalog {
    mux: Arc<CommandMultiplexer>,
    listing: AsyncFuture<ScriptListResult>,
    parsed: Mutex<Vec<Script>>,
}

impl ScriptCatalog {
    /// Creates an empty catalog listing through `mux`. Nothing is sent
    /// until the listing is first requested.
    #[must_use]
    pub fn new(mux: Arc<CommandMultiplexer>) -> Self {
        Self {
            mux,
            listing: AsyncFuture::new(),
            parsed: Mutex::new(Vec::new()),
        }
    }

    /// The current listing, starting the first load if needed.
    pub fn scripts(&self) -> AsyncFuture<ScriptListResult> {
        let _started = self
            .listing
            .initialize_running(|resolver| self.list(move |outcome| resolver.resolve(outcome)));
        self.listing.clone()
    }

    /// Reloads the listing. A load already in flight is left to finish.
    pub fn refresh(&self) {
        if !self.listing.is_initialized() {
            let _listing = self.scripts();
            return;
        }
        match self
            .listing
            .reinitialize_running(|resolver| self.list(move |outcome| resolver.resolve(outcome)))
        {
            Ok(()) => debug!(target: SCRIPTS_TARGET, "script listing refreshed"),
            Err(FutureError::NotDone) => {
                debug!(target: SCRIPTS_TARGET, "script listing already loading");
            }
            Err(other) => warn!(target: SCRIPTS_TARGET, error = %other, "refresh refused"),
        }
    }

    /// Records the script carried by an `afterCompile` event.
    pub fn on_script_parsed(&self, event: &Event) {
        let Some(body) = event.body.clone() else {
            warn!(target: SCRIPTS_TARGET, event = %event.event, "script event without body");
            return;
        };
        match serde_json::from_value::<AfterCompileBody>(body) {
            Ok(AfterCompileBody { script }) => {
                debug!(target: SCRIPTS_TARGET, id = script.id, "script parsed");
                let mut parsed = self.parsed.lock().unwrap_or_else(PoisonError::into_inner);
                parsed.retain(|known| known.id != script.id);
                parsed.push(script);
            }
            Err(error) => {
                warn!(target: SCRIPTS_TARGET, error = %error, "undecodable script event");
            }
        }
    }

    /// Every script known so far, ordered by id. Parsed scripts override
    /// listed ones with the same id.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Script> {
        let mut merged = BTreeMap::new();
        if let Some(Ok(Ok(listed))) = self.listing.try_get() {
            for script in listed.iter() {
                merged.insert(script.id, script.clone());
            }
        }
        for script in self
            .parsed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
        {
            merged.insert(script.id, script.clone());
        }
        merged.into_values().collect()
    }

    /// Fetches the sources of `ids`, one request per script, all in flight
    /// together. `on_result` receives the scripts in `ids` order, or the
    /// first failure.
    pub fn load_sources<F>(&self, ids: &[u64], on_result: F, completion: Relay) -> RelayOk
    where
        F: FnOnce(Result<Vec<Script>, CallError>) + Send + 'static,
    {
        let merger = Arc::new(FutureMerger::<(u64, Result<Script, CallError>)>::new());
        let order = ids.to_vec();
        let accepted = merger.future().get_async(
            move |merged| match merged {
                Ok(results) => on_result(collect_sources(&order, results)),
                Err(error) => on_result(Err(CallError::Protocol {
                    command: SCRIPTS.to_owned(),
                    message: error.to_string(),
                })),
            },
            completion,
        );
        for &id in ids {
            self.load_source(&merger, id);
        }
        if let Err(error) = merger.declare_complete() {
            error!(target: SCRIPTS_TARGET, error = %error, "source load declared twice");
        }
        accepted
    }

    fn load_source(&self, merger: &Arc<FutureMerger<(u64, Result<Script, CallError>)>>, id: u64) {
        let slot: Arc<Mutex<Option<Result<Script, CallError>>>> = Arc::default();
        let recorded = Arc::clone(&slot);
        let tracked = merger.track(move |failure| {
            let outcome = recorded
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
                .unwrap_or_else(|| {
                    Err(CallError::Protocol {
                        command: SCRIPTS.to_owned(),
                        message: failure.map_or_else(
                            || "source load ended without a reply".to_owned(),
                            |cause| cause.to_string(),
                        ),
                    })
                });
            (id, outcome)
        });
        let relay = match tracked {
            Ok(relay) => relay,
            Err(error) => {
                error!(target: SCRIPTS_TARGET, id, error = %error, "source load tracked late");
                return;
            }
        };
        let request = Request::new(SCRIPTS, Some(json!({"ids": [id], "includeSource": true})));
        let step = Step::send(request, move |response| {
            let scripts: Vec<Script> = response.decode_body()?;
            scripts
                .into_iter()
                .find(|script| script.id == id)
                .map(Step::finish)
                .ok_or_else(|| CallError::Protocol {
                    command: SCRIPTS.to_owned(),
                    message: format!("script {id} missing from reply"),
                })
        });
        let _accepted = run_chain(
            &self.mux,
            step,
            move |outcome| {
                *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(outcome);
            },
            relay,
        );
    }

    fn list<F>(&self, on_result: F)
    where
        F: FnOnce(ScriptListResult) + Send + 'static,
    {
        let step = Step::send(Request::new(SCRIPTS, None), |response| {
            let scripts: Vec<Script> = response.decode_body()?;
            Ok(Step::finish(Arc::new(scripts)))
        });
        let _accepted = run_chain(&self.mux, step, on_result, Relay::detached());
    }
}

fn collect_sources(
    order: &[u64],
    results: Vec<(u64, Result<Script, CallError>)>,
) -> Result<Vec<Script>, CallError> {
    let mut by_id = BTreeMap::new();
    for (id, outcome) in results {
        by_id.insert(id, outcome?);
    }
    Ok(order
        .iter()
        .filter_map(|id| by_id.get(id).cloned())
        .collect())
}
