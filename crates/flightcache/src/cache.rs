use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::notification::RemovalCause;
use tokio_util::sync::CancellationToken;

use crate::coalesce::Coalescer;
use crate::config::CacheConfig;
use crate::error::{ConfigError, LoadResult};
use crate::loader::{Loaded, Loader};

/// An item saved in the in-memory moka cache.
#[derive(Clone, Debug)]
struct CacheItem<V> {
    /// The cached value.
    value: V,
    /// The weight of this item, as given on insertion.
    cost: u32,
    /// How long after its insertion this item expires, if at all.
    ttl: Option<Duration>,
}

type InMemoryCache<K, V> = moka::future::Cache<K, CacheItem<V>>;

/// A struct implementing [`moka::Expiry`] that uses the per-item TTL as the expiration time.
struct ItemExpiration;

impl<K, V> moka::Expiry<K, CacheItem<V>> for ItemExpiration {
    fn expire_after_create(
        &self,
        _key: &K,
        value: &CacheItem<V>,
        _current_time: Instant,
    ) -> Option<Duration> {
        value.ttl
    }

    fn expire_after_update(
        &self,
        _key: &K,
        value: &CacheItem<V>,
        _current_time: Instant,
        _current_duration: Option<Duration>,
    ) -> Option<Duration> {
        // an overwrite replaces the expiration, including dropping it for a plain `set`
        value.ttl
    }
}

/// A read-through cache that coalesces concurrent loads of missing keys.
///
/// Lookups are served from an in-memory moka cache. On a miss, and if a [`Loader`] is
/// configured, the value is loaded and written back into the cache. Concurrent misses for the
/// same key share a single load, see [`Coalescer`].
///
/// Cloning the cache is cheap, clones share all their state.
pub struct Cache<K, V> {
    /// Name of the cache, used for logging and metrics.
    name: Arc<str>,

    /// The eviction cache holding the values.
    cache: InMemoryCache<K, V>,

    /// Fills misses, if configured.
    loader: Option<Arc<dyn Loader<K, V>>>,

    /// Deduplicates concurrent loads.
    loads: Coalescer<K, V>,

    /// Items costing more than this are never admitted.
    max_cost: u64,

    /// Whether to emit statsd metrics.
    metrics: bool,

    /// Cancelled on [`close`](Self::close), and handed to the loader.
    shutdown: CancellationToken,
}

impl<K, V> Clone for Cache<K, V> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            cache: self.cache.clone(),
            loader: self.loader.clone(),
            loads: self.loads.clone(),
            max_cost: self.max_cost,
            metrics: self.metrics,
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<K, V> fmt::Debug for Cache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("name", &self.name)
            .field("in-memory items", &self.cache.entry_count())
            .field("loads", &self.loads)
            .field("has loader", &self.loader.is_some())
            .field("closed", &self.shutdown.is_cancelled())
            .finish()
    }
}

impl<K, V> Cache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Creates a plain cache, which reports misses as they are.
    pub fn new(config: &CacheConfig) -> Result<Self, ConfigError> {
        Self::build(config, None)
    }

    /// Creates a cache that fills misses using `loader`.
    pub fn with_loader<L>(config: &CacheConfig, loader: L) -> Result<Self, ConfigError>
    where
        L: Loader<K, V>,
    {
        Self::build(config, Some(Arc::new(loader)))
    }

    fn build(
        config: &CacheConfig,
        loader: Option<Arc<dyn Loader<K, V>>>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let name: Arc<str> = config.name.as_str().into();
        let mut builder = InMemoryCache::builder()
            .max_capacity(config.max_cost)
            .name(&config.name)
            .expire_after(ItemExpiration)
            .weigher(|_k, item: &CacheItem<V>| item.cost)
            .eviction_listener({
                let name = Arc::clone(&name);
                move |_key, _item, cause| {
                    if cause != RemovalCause::Explicit && cause != RemovalCause::Replaced {
                        tracing::trace!(cache = %name, ?cause, "Evicted cache item");
                    }
                }
            });
        if let Some(initial_capacity) = config.initial_capacity {
            builder = builder.initial_capacity(initial_capacity);
        }
        if let Some(time_to_idle) = config.time_to_idle {
            builder = builder.time_to_idle(time_to_idle);
        }

        Ok(Self {
            name,
            cache: builder.build(),
            loader,
            loads: Coalescer::new(),
            max_cost: config.max_cost,
            metrics: config.metrics,
            shutdown: CancellationToken::new(),
        })
    }

    /// The name of this cache.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Looks up `key`, loading it on a miss if a loader is configured.
    ///
    /// A hit never touches the loader. A miss waits for the load of `key`, which may already
    /// be running on behalf of another caller, so this can take as long as the loader does.
    ///
    /// Load failures are reported as a plain miss. Use [`try_get`](Self::try_get) to tell them
    /// apart.
    pub async fn get(&self, key: &K) -> Option<V> {
        match self.try_get(key).await {
            Ok(value) => value,
            Err(err) => {
                tracing::debug!(cache = %self.name, error = %err, "Load failed, reporting a miss");
                None
            }
        }
    }

    /// Looks up `key` like [`get`](Self::get), but reports load failures.
    ///
    /// Returns `Ok(None)` for a miss when no loader is configured or the cache was closed.
    pub async fn try_get(&self, key: &K) -> LoadResult<Option<V>> {
        if self.shutdown.is_cancelled() {
            return Ok(None);
        }
        self.count("cache.access");

        if let Some(item) = self.cache.get(key).await {
            self.count("cache.hit");
            return Ok(Some(item.value));
        }
        self.count("cache.miss");

        let Some(loader) = &self.loader else {
            return Ok(None);
        };
        self.loads
            .run_once(key.clone(), || self.load_and_store(loader.as_ref(), key))
            .await
            .map(Some)
    }

    /// Runs the loader and writes its result back into the cache.
    ///
    /// The value is returned even if the eviction cache does not admit it.
    async fn load_and_store(&self, loader: &dyn Loader<K, V>, key: &K) -> anyhow::Result<V> {
        self.count("cache.load");
        let start = Instant::now();
        let loaded = loader.load(self.shutdown.child_token(), key).await;
        if self.metrics {
            metric!(timer("cache.load.duration") = start.elapsed(), "cache" => &self.name);
        }

        let Loaded { value, cost, ttl } =
            loaded.inspect_err(|_| self.count("cache.load.failed"))?;
        let admitted = match ttl {
            Some(ttl) => {
                self.set_with_ttl(key.clone(), value.clone(), cost, ttl)
                    .await
            }
            None => self.set(key.clone(), value.clone(), cost).await,
        };
        if !admitted {
            tracing::debug!(cache = %self.name, cost, "Loaded value was not admitted");
        }

        Ok(value)
    }

    /// Inserts `value` under `key`, weighing it with `cost`.
    ///
    /// Returns whether the item was handed to the eviction cache. This is best-effort: an
    /// admitted item may still be dropped right away by the eviction policy, so a later
    /// [`get`](Self::get) is not guaranteed to find it.
    pub async fn set(&self, key: K, value: V, cost: u32) -> bool {
        self.insert(key, CacheItem {
            value,
            cost,
            ttl: None,
        })
        .await
    }

    /// Inserts `value` under `key` like [`set`](Self::set), expiring it after `ttl`.
    ///
    /// A zero `ttl` means the item never expires.
    pub async fn set_with_ttl(&self, key: K, value: V, cost: u32, ttl: Duration) -> bool {
        self.insert(key, CacheItem {
            value,
            cost,
            ttl: (!ttl.is_zero()).then_some(ttl),
        })
        .await
    }

    async fn insert(&self, key: K, item: CacheItem<V>) -> bool {
        if self.shutdown.is_cancelled() || u64::from(item.cost) > self.max_cost {
            self.count("cache.set.rejected");
            return false;
        }

        self.cache.insert(key, item).await;
        true
    }

    /// Removes `key` from the cache. Removing a missing key is a no-op.
    pub async fn delete(&self, key: &K) {
        self.cache.invalidate(key).await;
    }

    /// Drops all items and cancels the token given to running loads.
    ///
    /// Afterwards, lookups report misses and inserts are rejected. Loads that are already
    /// running are not interrupted, unless the loader honours its cancellation token.
    pub async fn close(&self) {
        self.shutdown.cancel();
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
        tracing::info!(cache = %self.name, "Closed cache");
    }

    /// Performs pending maintenance work of the eviction cache, like evictions.
    pub async fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks().await;
    }

    /// The approximate number of items in the cache.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// The approximate total cost of the items in the cache.
    pub fn weighted_size(&self) -> u64 {
        self.cache.weighted_size()
    }

    fn count(&self, metric: &str) {
        if self.metrics {
            metric!(counter(metric) += 1, "cache" => &self.name);
        }
    }
}
