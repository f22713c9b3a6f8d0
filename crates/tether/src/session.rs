//! One debug session: a multiplexer plus the caches layered on it.

use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread::JoinHandle;

use tracing::{debug, info};

use tether_config::SessionConfig;

use crate::breakpoints::{
    BreakpointSynchronizer, LinkMap, LocalBreakpointStore, SyncStatus, VmBreakpoints,
};
use crate::errors::CallError;
use crate::events::{EventRegistry, tags};
use crate::multiplexer::CommandMultiplexer;
use crate::protocol::{Request, Response};
use crate::relay::{Relay, RelayOk};
use crate::scripts::ScriptCatalog;
use crate::transport::{FrameReader, FramedWriter, Transport, spawn_reader};
use crate::values::{PropertyCache, VmPropertyLoader};

/// Log target for session lifecycle.
const SESSION_TARGET: &str = "tether::session";

/// Live conversation with one VM.
///
/// Event handlers hold the caches weakly; the delivery thread keeps only the
/// multiplexer alive.
pub struct DebugSession {
    config: SessionConfig,
    mux: Arc<CommandMultiplexer>,
    properties: Arc<PropertyCache>,
    scripts: Arc<ScriptCatalog>,
    links: Arc<Mutex<LinkMap>>,
}

impl DebugSession {
    /// Builds a session writing to `transport`. Replies must be fed to
    /// [`DebugSession::multiplexer`] by the caller.
    ///
    /// `events` may already carry handlers; the session adds its own for
    /// `break`, `exception` and `afterCompile`.
    #[must_use]
    pub fn new(
        config: SessionConfig,
        transport: Arc<dyn Transport>,
        events: Arc<EventRegistry>,
    ) -> Self {
        let mux = Arc::new(CommandMultiplexer::new(transport, Arc::clone(&events)));
        let properties = Arc::new(PropertyCache::new(Arc::new(VmPropertyLoader::new(
            Arc::clone(&mux),
        ))));
        let scripts = Arc::new(ScriptCatalog::new(Arc::clone(&mux)));

        for tag in [tags::BREAK, tags::EXCEPTION] {
            let cache = Arc::downgrade(&properties);
            events.register(tag, move |event| {
                if let Some(live) = cache.upgrade() {
                    debug!(target: SESSION_TARGET, event = %event.event, "VM suspended");
                    live.invalidate();
                }
            });
        }
        let catalog: Weak<ScriptCatalog> = Arc::downgrade(&scripts);
        events.register(tags::AFTER_COMPILE, move |event| {
            if let Some(live) = catalog.upgrade() {
                live.on_script_parsed(event);
            }
        });

        Self {
            config,
            mux,
            properties,
            scripts,
            links: Arc::new(Mutex::new(LinkMap::new())),
        }
    }

    /// Builds a session over a framed byte stream and starts the delivery
    /// thread reading `reader`.
    ///
    /// # Errors
    ///
    /// Returns the I/O error raised when the delivery thread cannot be
    /// spawned.
    pub fn connect<R, W>(
        config: SessionConfig,
        reader: R,
        writer: W,
        events: Arc<EventRegistry>,
    ) -> io::Result<(Self, JoinHandle<()>)>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let session = Self::new(config, Arc::new(FramedWriter::new(writer)), events);
        let delivery = spawn_reader(FrameReader::new(reader), Arc::clone(&session.mux))?;
        info!(target: SESSION_TARGET, "debug session connected");
        Ok((session, delivery))
    }

    /// Settings the session was built with.
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The session's multiplexer.
    #[must_use]
    pub const fn multiplexer(&self) -> &Arc<CommandMultiplexer> {
        &self.mux
    }

    /// Property cache, invalidated whenever the VM suspends.
    #[must_use]
    pub const fn properties(&self) -> &Arc<PropertyCache> {
        &self.properties
    }

    /// Script catalog fed by `afterCompile` events.
    #[must_use]
    pub const fn scripts(&self) -> &Arc<ScriptCatalog> {
        &self.scripts
    }

    /// Synchronizer between `store` and this VM. Every synchronizer built
    /// from one session shares its breakpoint links.
    #[must_use]
    pub fn breakpoint_synchronizer(
        &self,
        store: Arc<dyn LocalBreakpointStore>,
    ) -> BreakpointSynchronizer {
        BreakpointSynchronizer::new(
            VmBreakpoints::new(Arc::clone(&self.mux)),
            store,
            Arc::clone(&self.links),
        )
    }

    /// Synchronizes `store` in the configured default direction.
    pub fn sync_breakpoints<F>(
        &self,
        store: Arc<dyn LocalBreakpointStore>,
        on_status: F,
        completion: Relay,
    ) -> RelayOk
    where
        F: FnOnce(SyncStatus) + Send + 'static,
    {
        self.breakpoint_synchronizer(store).sync(
            self.config.sync_direction().into(),
            on_status,
            completion,
        )
    }

    /// Current breakpoint links.
    #[must_use]
    pub fn links(&self) -> LinkMap {
        self.links
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Sends `request` and blocks for its reply, bounded by the configured
    /// request timeout.
    ///
    /// # Errors
    ///
    /// See [`CommandMultiplexer::send_and_wait`].
    pub fn send_and_wait(&self, request: Request) -> Result<Response, CallError> {
        self.mux
            .send_and_wait(request, self.config.request_timeout())
    }

    /// Closes the session, failing every pending call.
    pub fn shutdown(&self) {
        info!(
            target: SESSION_TARGET,
            pending = self.mux.pending_count(),
            "debug session shutting down"
        );
        self.mux.shutdown();
    }
}
