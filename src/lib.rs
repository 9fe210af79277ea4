//! A bounded cache for expensive, named model sessions.
//!
//! A background removal service has a fixed list of models it can run, and building a session for any of them is
//! slow: weights have to be found (and maybe downloaded), then loaded into an inference runtime which holds a lot of
//! memory.  Keeping every session alive forever isn't an option on a small GPU, but rebuilding one per request is far
//! too slow.  This crate sits in the middle:
//!
//! [SessionCache] hands out shared sessions by name, building them through a [SessionFactory] on first use and keeping
//! up to a configured number alive, evicting the least recently used beyond that.  Names are checked against a closed
//! [Catalog] before anything else happens.  Concurrent requests for a session that is still being built wait for it
//! rather than building it twice.
//!
//! [preload] walks the whole catalog at startup so that every model's weights are fetched before traffic arrives,
//! and leaves the default model resident.
//!
//! [RequestPipeline] is the per-request glue: resolve a name, get a session, run a [Transform] over the upload.
//!
//! [BoundedLru] is the low-level recency list behind the cache, and is exposed because it's useful in other contexts.
mod bounded_lru;
mod catalog;
pub mod config;
mod filesystem_factory;
pub mod http;
mod pipeline;
mod preload;
mod session_cache;
mod traits;

pub use bounded_lru::*;
pub use catalog::*;
pub use filesystem_factory::*;
pub use pipeline::*;
pub use preload::*;
pub use session_cache::*;
pub use traits::*;
