//! Asynchronous session core for remote VM debuggers.
//!
//! The crate keeps one live conversation with a debuggee over a single
//! message transport. Requests are correlated with their replies by sequence
//! number while unsolicited events are routed to registered handlers
//! ([`multiplexer`]). Operations that span several remote calls are composed
//! without blocking a thread, using single-assignment futures ([`future`])
//! and completion obligations that fire exactly once ([`relay`]). On top of
//! that sit the breakpoint reconciliation between the editor and the VM
//! ([`breakpoints`]), the property cache ([`values`]) and the script catalog
//! ([`scripts`]).
//!
//! Nothing here owns a scheduler. Callers issue requests from any thread and
//! a transport delivery thread feeds replies back in. The only blocking
//! points are [`future::AsyncFuture::get_sync`] and
//! [`semaphore::CallbackSemaphore::wait`]; calling either from inside a
//! callback running on the delivery thread deadlocks the session.

pub mod breakpoints;
pub mod chain;
mod errors;
pub mod events;
pub mod future;
pub mod multiplexer;
pub mod protocol;
pub mod relay;
pub mod scripts;
pub mod semaphore;
mod session;
pub mod telemetry;
pub mod transport;
pub mod values;

pub use errors::{CallError, SendError};
pub use session::DebugSession;

#[cfg(test)]
mod tests;
