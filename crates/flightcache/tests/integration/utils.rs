use std::sync::Arc;
use std::time::Duration;

use flightcache::config::CacheConfig;
use flightcache::{CancellationToken, Loaded, Loader, loader_fn};
use flightcache_test::MockBackend;

pub use flightcache_test::setup;

/// A cache configuration roomy enough that nothing is ever evicted in tests.
pub fn test_config() -> CacheConfig {
    CacheConfig {
        name: "test".into(),
        max_cost: 1 << 30,
        ..Default::default()
    }
}

/// A loader serving values from `backend`, each costing `1` and expiring after `ttl`.
pub fn backend_loader(backend: Arc<MockBackend>, ttl: Duration) -> impl Loader<String, i64> {
    loader_fn(move |_cancel: CancellationToken, key: String| {
        let backend = Arc::clone(&backend);
        async move {
            let value = backend.fetch(&key).await;
            Ok::<_, anyhow::Error>(Loaded::new(value, 1).with_ttl(ttl))
        }
    })
}
