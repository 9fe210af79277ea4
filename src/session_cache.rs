//! The [SessionCache] drives a [SessionFactory], keeping a bounded number of its sessions alive.
//!
//! Sessions are expensive: building one usually means reading (or downloading) model weights and initializing an
//! inference runtime.  The cache hands out `Arc`s to sessions, keeps the most recently used ones up to a fixed count,
//! and evicts the least recently used ones beyond that.
//!
//! Concurrent misses for the same name are coalesced: one caller builds the session while the others wait for it and
//! then share the result.  Misses for different names build in parallel.  The factory never runs while the entry list
//! is locked, so a slow download doesn't stall hits for other models.
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::*;

type GuardMap = HashMap<Arc<str>, Arc<Mutex<()>>, ahash::RandomState>;

#[derive(Debug, Clone, derive_builder::Builder)]
#[builder(build_fn(validate = "Self::validate"))]
pub struct SessionCacheConfig {
    /// Maximum number of sessions kept alive at once.
    pub max_sessions: usize,
}

impl SessionCacheConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        match self.max_sessions {
            Some(0) => Err("max_sessions must be at least 1".to_string()),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError<FactoryError> {
    #[error("Unknown model '{name}'. Must be one of: {known}")]
    InvalidName { name: String, known: String },
    #[error("Failed to create session for model '{name}': {source}")]
    CreationFailed {
        name: String,
        #[source]
        source: FactoryError,
    },
}

/// Point-in-time counters for a [SessionCache].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Requests served from a resident session, including callers who waited on someone else's creation.
    pub hits: u64,
    /// Calls made to the factory.
    pub misses: u64,
    pub evictions: u64,
    pub creation_failures: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    creation_failures: AtomicU64,
}

/// Every invariant of the guarded data holds between statements, so a panic elsewhere doesn't leave it broken.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct SessionCache<F: SessionFactory> {
    catalog: Catalog,
    entries: Mutex<BoundedLru<Arc<str>, F::Handle>>,
    /// Mutexes that stop multiple threads trying to create the same session.
    ///
    /// One per catalog name at most, so this never needs pruning.
    creation_guards: Mutex<GuardMap>,
    factory: F,
    eviction_hook: Option<Box<dyn EvictionHook<F::Handle>>>,
    counters: Counters,
}

impl<F: SessionFactory> SessionCache<F> {
    /// # Panics
    ///
    /// If `config.max_sessions` is zero.  [SessionCacheConfigBuilder] refuses to build such a config.
    pub fn new(factory: F, catalog: Catalog, config: SessionCacheConfig) -> SessionCache<F> {
        SessionCache {
            catalog,
            entries: Mutex::new(BoundedLru::new(config.max_sessions)),
            creation_guards: Default::default(),
            factory,
            eviction_hook: None,
            counters: Default::default(),
        }
    }

    /// Like [SessionCache::new], but `hook` sees every session as it is evicted.
    pub fn with_eviction_hook<H>(
        factory: F,
        catalog: Catalog,
        config: SessionCacheConfig,
        hook: H,
    ) -> SessionCache<F>
    where
        H: EvictionHook<F::Handle> + 'static,
    {
        let mut cache = SessionCache::new(factory, catalog, config);
        cache.eviction_hook = Some(Box::new(hook));
        cache
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    pub fn capacity(&self) -> usize {
        lock(&self.entries).capacity()
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }

    /// Is a session for this name resident?  Doesn't count as a use.
    pub fn contains(&self, name: &str) -> bool {
        lock(&self.entries).contains(name)
    }

    /// Names of resident sessions, most recently used first.
    pub fn resident(&self) -> Vec<String> {
        lock(&self.entries)
            .iter()
            .map(|(name, _)| name.to_string())
            .collect()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            creation_failures: self.counters.creation_failures.load(Ordering::Relaxed),
        }
    }

    /// Find a resident session, marking it most recently used.
    fn search_for_session(&self, name: &str) -> Option<Arc<F::Handle>> {
        let found = lock(&self.entries).get(name);
        if found.is_some() {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            debug!(model = name, "Session cache hit");
        }
        found
    }

    /// Create a session, assuming we are holding the guard necessary to stop other threads from creating the same one
    /// in parallel.
    fn find_or_create_postchecked(
        &self,
        name: &Arc<str>,
    ) -> Result<Arc<F::Handle>, SessionError<F::Error>> {
        // Someone else may have finished creating it while we waited for the guard.
        if let Some(x) = self.search_for_session(name) {
            return Ok(x);
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        debug!(model = &**name, "Session cache miss");
        let started = Instant::now();
        let handle = match self.factory.create(name) {
            Ok(h) => Arc::new(h),
            Err(source) => {
                self.counters
                    .creation_failures
                    .fetch_add(1, Ordering::Relaxed);
                warn!(model = &**name, error = %source, "Failed to create session");
                return Err(SessionError::CreationFailed {
                    name: name.to_string(),
                    source,
                });
            }
        };
        info!(
            model = &**name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Created session"
        );

        // Insertion and the eviction sweep happen under one lock, so nobody observes the cache over capacity.
        let displaced = lock(&self.entries).insert(name.clone(), handle.clone());

        if let Some(old) = displaced.replaced {
            self.release(name, &old);
        }
        for (evicted_name, evicted) in displaced.evicted {
            self.release(&evicted_name, &evicted);
        }

        Ok(handle)
    }

    /// Hand an evicted session to the hook, if any.  Nothing that happens here reaches the caller.
    fn release(&self, name: &str, handle: &F::Handle) {
        self.counters.evictions.fetch_add(1, Ordering::Relaxed);
        debug!(model = name, "Evicted session");

        let hook = match self.eviction_hook.as_ref() {
            Some(h) => h,
            None => return,
        };
        match catch_unwind(AssertUnwindSafe(|| hook.on_evict(name, handle))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(model = name, error = %e, "Eviction hook failed"),
            Err(_) => warn!(model = name, "Eviction hook panicked"),
        }
    }

    /// Get the session for a model, creating it if it isn't resident.
    ///
    /// Names outside the catalog are rejected before the cache or the factory are consulted.  A failed creation
    /// leaves the cache untouched, so the next call for the same name tries again.
    pub fn get_or_create(&self, name: &str) -> Result<Arc<F::Handle>, SessionError<F::Error>> {
        let name = match self.catalog.resolve(name) {
            Some(n) => n.clone(),
            None => {
                return Err(SessionError::InvalidName {
                    name: name.to_string(),
                    known: self.catalog.describe(),
                });
            }
        };

        if let Some(x) = self.search_for_session(&name) {
            return Ok(x);
        }

        // Stop any other threads from trying to create this session, and make them wait on this thread to finish.
        let mutex = {
            let mut guard_inner = lock(&self.creation_guards);
            let tmp = guard_inner
                .entry(name.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())));
            (*tmp).clone()
        };
        // The type here is important: it makes sure that we actually lock the mutex, by making this variable definitely
        // be a guard.
        let _guard: MutexGuard<()> = lock(&mutex);

        self.find_or_create_postchecked(&name)
    }
}
