use std::fmt;
use std::future::Future;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

/// A value produced by a [`Loader`], together with how it should be cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Loaded<V> {
    /// The loaded value.
    pub value: V,
    /// The weight of the value in the cache's capacity accounting.
    pub cost: u32,
    /// How long the value stays readable. `None` means it never expires.
    pub ttl: Option<Duration>,
}

impl<V> Loaded<V> {
    /// A loaded value that never expires.
    pub fn new(value: V, cost: u32) -> Self {
        Self {
            value,
            cost,
            ttl: None,
        }
    }

    /// Attaches a time-to-live. A zero duration means the value never expires.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = (!ttl.is_zero()).then_some(ttl);
        self
    }
}

/// Loads values for keys missing from a [`Cache`](crate::Cache).
///
/// Loads are coalesced by the cache, so an implementation is called at most once at a time for
/// any given key. It may still be called concurrently for different keys.
pub trait Loader<K, V>: Send + Sync + 'static {
    /// Produces the value for `key`, along with its cost and optional TTL.
    ///
    /// The `cancel` token fires when the cache is closed. The cache itself never times out a
    /// load, so a loader talking to a slow backend should bring its own deadline.
    fn load<'a>(
        &'a self,
        cancel: CancellationToken,
        key: &'a K,
    ) -> BoxFuture<'a, anyhow::Result<Loaded<V>>>;
}

/// A [`Loader`] backed by a closure. Created by [`loader_fn`].
pub struct LoaderFn<F>(F);

impl<F> fmt::Debug for LoaderFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LoaderFn").finish_non_exhaustive()
    }
}

/// Wraps a closure taking the cancellation token and an owned key into a [`Loader`].
///
/// ```
/// use flightcache::config::CacheConfig;
/// use flightcache::{Cache, CancellationToken, Loaded, loader_fn};
///
/// let loader = loader_fn(|_cancel: CancellationToken, key: String| async move {
///     Ok(Loaded::new(key.len(), 1))
/// });
/// let cache: Cache<String, usize> = Cache::with_loader(&CacheConfig::default(), loader).unwrap();
/// # drop(cache);
/// ```
pub fn loader_fn<F>(f: F) -> LoaderFn<F> {
    LoaderFn(f)
}

impl<K, V, F, Fut> Loader<K, V> for LoaderFn<F>
where
    K: Clone + Send + Sync + 'static,
    F: Fn(CancellationToken, K) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Loaded<V>>> + Send + 'static,
{
    fn load<'a>(
        &'a self,
        cancel: CancellationToken,
        key: &'a K,
    ) -> BoxFuture<'a, anyhow::Result<Loaded<V>>> {
        Box::pin((self.0)(cancel, key.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_ttl_never_expires() {
        let loaded = Loaded::new("value", 1).with_ttl(Duration::ZERO);
        assert_eq!(loaded.ttl, None);

        let loaded = Loaded::new("value", 1).with_ttl(Duration::from_millis(10));
        assert_eq!(loaded.ttl, Some(Duration::from_millis(10)));
    }

    #[tokio::test]
    async fn test_loader_fn() {
        let loader = loader_fn(|cancel: CancellationToken, key: String| async move {
            anyhow::ensure!(!cancel.is_cancelled(), "cancelled");
            Ok(Loaded::new(key.to_uppercase(), 3))
        });

        let token = CancellationToken::new();
        let loaded = loader.load(token.clone(), &"abc".to_owned()).await.unwrap();
        assert_eq!(loaded, Loaded::new("ABC".to_owned(), 3));

        token.cancel();
        let err = loader.load(token, &"abc".to_owned()).await.unwrap_err();
        assert_eq!(err.to_string(), "cancelled");
    }
}
