//! The seams between the cache and the outside world.
//!
//! A [SessionFactory] turns a model name into a loaded session, which is usually slow: weights may have to be read
//! from disk or downloaded first.  A [Transform] runs a session over some input bytes.  An [EvictionHook] gets a
//! chance to release native resources when the cache lets go of a session.

/// Error type for collaborators which don't have a more specific one.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Build a ready-to-use session for a model name.
///
/// This may be called concurrently for different names, so implementations must be thread-safe.
pub trait SessionFactory: Send + Sync + 'static {
    type Handle: Send + Sync + 'static;
    type Error: std::error::Error + Send + Sync + 'static;

    fn create(&self, name: &str) -> Result<Self::Handle, Self::Error>;
}

/// Run a session over input bytes, producing output bytes.
///
/// Transforms never touch the cache.
pub trait Transform<Handle>: Send + Sync {
    type Params;
    type Error: std::error::Error + Send + Sync + 'static;

    fn apply(
        &self,
        handle: &Handle,
        input: &[u8],
        params: &Self::Params,
    ) -> Result<Vec<u8>, Self::Error>;
}

/// Called with each session the cache evicts.
///
/// Failures are logged by the cache and otherwise ignored.
pub trait EvictionHook<Handle>: Send + Sync {
    fn on_evict(&self, name: &str, handle: &Handle) -> Result<(), BoxError>;
}

impl<Handle, F> EvictionHook<Handle> for F
where
    F: Fn(&str, &Handle) -> Result<(), BoxError> + Send + Sync,
{
    fn on_evict(&self, name: &str, handle: &Handle) -> Result<(), BoxError> {
        self(name, handle)
    }
}
