//! Deduplicating property cache with O(1) invalidation.
//!
//! Each entry remembers the generation it was loaded under. Invalidation
//! bumps the cache-wide generation instead of walking entries. The first read
//! after a generation change sweeps every stale entry out of the table.
//!
//! Lock order: the entry table, then the generation counter. Invalidation
//! touches only the counter.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use super::loader::PropertyLoader;
use super::PropertyResult;
use crate::future::AsyncFuture;

/// Log target for property cache activity.
const CACHE_TARGET: &str = "tether::values";

struct CacheEntry {
    generation: u64,
    properties: AsyncFuture<PropertyResult>,
}

impl CacheEntry {
    /// Whether the entry can serve a read under `generation`. Failed loads
    /// are retried.
    fn serves(&self, generation: u64) -> bool {
        self.generation == generation
            && !matches!(self.properties.try_get(), Some(Ok(Err(_)) | Err(_)))
    }
}

#[derive(Default)]
struct CacheTable {
    entries: HashMap<String, CacheEntry>,
    /// Generation the table was last swept under.
    swept: u64,
}

impl CacheTable {
    /// Drops entries loaded before `generation`, once per generation change.
    fn sweep(&mut self, generation: u64) {
        if self.swept == generation {
            return;
        }
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.generation == generation);
        self.swept = generation;
        debug!(
            target: CACHE_TARGET,
            generation,
            evicted = before - self.entries.len(),
            "swept stale property entries"
        );
    }
}

/// Property lists keyed by remote object id.
pub struct PropertyCache {
    loader: Arc<dyn PropertyLoader>,
    table: Mutex<CacheTable>,
    generation: AtomicU64,
}

impl PropertyCache {
    /// Creates an empty cache loading through `loader`.
    #[must_use]
    pub fn new(loader: Arc<dyn PropertyLoader>) -> Self {
        Self {
            loader,
            table: Mutex::new(CacheTable::default()),
            generation: AtomicU64::new(0),
        }
    }

    /// Properties of `object_id`.
    ///
    /// Concurrent callers for the same id share one load. An entry loaded
    /// under an older generation is reloaded.
    pub fn load_properties(&self, object_id: &str) -> AsyncFuture<PropertyResult> {
        let (properties, generation, fresh) = {
            let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            let generation = self.generation.load(Ordering::SeqCst);
            table.sweep(generation);
            match table.entries.get(object_id) {
                Some(entry) if entry.serves(generation) => {
                    (entry.properties.clone(), generation, false)
                }
                _ => {
                    let properties = AsyncFuture::new();
                    table.entries.insert(
                        object_id.to_owned(),
                        CacheEntry {
                            generation,
                            properties: properties.clone(),
                        },
                    );
                    (properties, generation, true)
                }
            }
        };
        if fresh {
            debug!(target: CACHE_TARGET, object_id, generation, "loading properties");
            let loader = Arc::clone(&self.loader);
            let _started = properties.initialize_running(|resolver| loader.load(object_id, resolver));
        }
        properties
    }

    /// Marks every entry stale.
    pub fn invalidate(&self) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(target: CACHE_TARGET, generation, "property cache invalidated");
    }

    /// Current generation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Number of entries held, including stale ones not yet swept.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
