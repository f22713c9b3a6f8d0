use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{Property, PropertyResult};
use crate::chain::{Step, run_chain};
use crate::errors::CallError;
use crate::future::Resolver;
use crate::multiplexer::CommandMultiplexer;
use crate::protocol::Request;
use crate::relay::Relay;

/// Command fetching an object's properties.
pub const GET_PROPERTIES: &str = "getProperties";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GetPropertiesArguments<'a> {
    object_id: &'a str,
}

#[derive(Deserialize)]
struct GetPropertiesBody {
    #[serde(default)]
    properties: Vec<Property>,
}

/// Fetches the properties of one remote object.
pub trait PropertyLoader: Send + Sync {
    /// Starts loading `object_id` and resolves `resolver` with the outcome.
    fn load(&self, object_id: &str, resolver: Resolver<PropertyResult>);
}

/// [`PropertyLoader`] issuing `getProperties` to the VM.
pub struct VmPropertyLoader {
    mux: Arc<CommandMultiplexer>,
}

impl VmPropertyLoader {
    /// Loads through `mux`.
    #[must_use]
    pub const fn new(mux: Arc<CommandMultiplexer>) -> Self {
        Self { mux }
    }
}

impl PropertyLoader for VmPropertyLoader {
    fn load(&self, object_id: &str, resolver: Resolver<PropertyResult>) {
        let arguments = GetPropertiesArguments { object_id };
        let request = match Request::with_arguments(GET_PROPERTIES, &arguments) {
            Ok(request) => request,
            Err(error) => {
                resolver.resolve(Err(CallError::Protocol {
                    command: GET_PROPERTIES.to_owned(),
                    message: error.to_string(),
                }));
                return;
            }
        };
        let step = Step::send(request, |response| {
            let body: GetPropertiesBody = response.decode_body()?;
            Ok(Step::finish(Arc::new(body.properties)))
        });
        let _accepted = run_chain(
            &self.mux,
            step,
            move |outcome| resolver.resolve(outcome),
            Relay::detached(),
        );
    }
}
