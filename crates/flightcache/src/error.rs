use std::sync::Arc;

use thiserror::Error;

/// The outcome of a coalesced load, shared between the leader and all of its followers.
pub type LoadResult<V> = Result<V, LoadError>;

/// An error that happens while loading a missing value.
///
/// This error is cheap to clone, as the same instance is handed to every caller that waited
/// on the failed load.
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    /// The loader returned an error.
    #[error("load failed: {0:#}")]
    Failed(Arc<anyhow::Error>),
    /// The load panicked.
    ///
    /// The panic was caught, and the attached string contains its message.
    #[error("load panicked: {0}")]
    Panicked(String),
    /// The caller running the load went away before it finished.
    ///
    /// This happens when the future driving the load is dropped, for example because its task
    /// was aborted. Waiting callers are released with this error instead of blocking forever.
    #[error("load was abandoned before completing")]
    Abandoned,
}

impl From<anyhow::Error> for LoadError {
    fn from(err: anyhow::Error) -> Self {
        Self::Failed(Arc::new(err))
    }
}

/// An error in the configuration passed to [`Cache::new`](crate::Cache::new).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// `max_cost` must allow at least one unit of cost.
    #[error("cache `{0}` has a max_cost of zero")]
    ZeroCapacity(String),
    /// The cache must have a name for logging and metrics.
    #[error("cache name must not be empty")]
    EmptyName,
}
