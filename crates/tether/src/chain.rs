//! Multi-hop remote operations expressed as data.
//!
//! A chain is a sequence of [`Step`]s. Each `Send` step issues one request
//! and maps the reply to the next step; `Finish` ends the chain with a
//! value. [`run_chain`] walks the steps, carrying the caller's completion
//! obligation from hop to hop under a [`Guard`], so the completion fires
//! exactly once whether the chain finishes, a hop fails, or a hop panics.

use std::sync::Arc;

use tracing::debug;

use crate::errors::CallError;
use crate::multiplexer::CommandMultiplexer;
use crate::protocol::{Request, Response};
use crate::relay::{Guard, Relay, RelayOk, run_guarded};

/// Log target for chain execution.
const CHAIN_TARGET: &str = "tether::chain";

type ResponseHandler<R> = Box<dyn FnOnce(Response) -> Result<Step<R>, CallError> + Send>;

/// One hop of a remote operation.
pub enum Step<R> {
    /// The chain is done.
    Finish(R),
    /// Issue `request` and continue with whatever `on_response` returns.
    Send {
        /// Request issued by this hop.
        request: Request,
        /// Maps the successful reply to the next step.
        on_response: ResponseHandler<R>,
    },
}

impl<R> Step<R> {
    /// Ends the chain with `value`.
    pub const fn finish(value: R) -> Self {
        Self::Finish(value)
    }

    /// A hop issuing `request`. Rejected replies never reach
    /// `on_response`; they end the chain with [`CallError::Remote`].
    pub fn send<F>(request: Request, on_response: F) -> Self
    where
        F: FnOnce(Response) -> Result<Self, CallError> + Send + 'static,
    {
        Self::Send {
            request,
            on_response: Box::new(on_response),
        }
    }
}

/// Runs `step` to completion on `mux`.
///
/// `on_result` receives the chain's value or the first error, then
/// `completion` fires. If a hop's `on_response` panics the chain stops,
/// `on_result` is not called, and `completion` carries the failure.
pub fn run_chain<R, F>(
    mux: &Arc<CommandMultiplexer>,
    step: Step<R>,
    on_result: F,
    completion: Relay,
) -> RelayOk
where
    R: Send + 'static,
    F: FnOnce(Result<R, CallError>) + Send + 'static,
{
    match step {
        Step::Finish(value) => {
            let failure = run_guarded(move || on_result(Ok(value)));
            completion.complete(failure)
        }
        Step::Send {
            request,
            on_response,
        } => {
            let command = request.command().to_owned();
            let guard = Guard::new(completion);
            let hop_completion = guard.completion();
            let chain_mux = Arc::clone(mux);
            let sent = mux.send(
                request,
                move |reply| {
                    match reply
                        .and_then(Response::into_result)
                        .and_then(on_response)
                    {
                        Ok(next) => {
                            if guard
                                .discharge(|owed| run_chain(&chain_mux, next, on_result, owed))
                                .is_none()
                            {
                                debug!(
                                    target: CHAIN_TARGET,
                                    command = %command,
                                    "chain completion already fired"
                                );
                            }
                        }
                        Err(error) => on_result(Err(error)),
                    }
                },
                hop_completion,
            );
            // A failed send has already run the reply path and fired the
            // completion.
            sent.unwrap_or_else(|_| RelayOk::accepted())
        }
    }
}
