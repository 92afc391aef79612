//! A read-through cache that coalesces concurrent misses.
//!
//! The [`Cache`] facade sits in front of an in-memory [`moka`] cache. On a miss it asks the
//! configured [`Loader`] for the value, but only once per key at a time: every other caller
//! that misses on the same key while that load is running waits for it and receives the very
//! same result. See [`Coalescer`] for the coordination protocol itself.
//!
//! ## Admission is best-effort
//!
//! [`Cache::set`] and [`Cache::set_with_ttl`] return whether an entry was handed to the
//! eviction cache. A `true` return does *not* guarantee a later [`Cache::get`] finds it: the
//! eviction policy may drop it right away under pressure.
//!
//! ## Limitations
//!
//! The coordinator enforces no timeout. A loader that never returns keeps every follower of
//! that key waiting. Loaders receive a [`CancellationToken`] which is cancelled when the cache
//! is [closed](Cache::close), and should honour it.

#[macro_use]
pub mod metrics;

mod cache;
mod coalesce;
pub mod config;
mod error;
mod loader;
pub mod logging;
mod utils;

pub use cache::Cache;
pub use coalesce::Coalescer;
pub use error::{ConfigError, LoadError, LoadResult};
pub use loader::{Loaded, Loader, LoaderFn, loader_fn};
pub use tokio_util::sync::CancellationToken;
