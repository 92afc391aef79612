use std::sync::Arc;
use std::time::Duration;

use flightcache::Cache;
use flightcache_test::MockBackend;
use futures::future::join_all;

use crate::{backend_loader, setup, test_config};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_misses_load_once() {
    setup();

    let backend = Arc::new(MockBackend::with_latency(Duration::from_millis(50)));
    let loader = backend_loader(Arc::clone(&backend), Duration::ZERO);
    let cache = Cache::with_loader(&test_config(), loader).unwrap();

    let tasks = (0..1_000).map(|_| {
        let cache = cache.clone();
        tokio::spawn(async move { cache.get(&"key".into()).await })
    });
    let results = join_all(tasks).await;

    assert_eq!(backend.calls("key"), 1);
    for result in results {
        assert_eq!(result.unwrap(), Some(0));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_coalescing_across_miss_waves() {
    setup();

    // the loaded values expire quickly, so every round of lookups misses again
    let backend = Arc::new(MockBackend::with_latency(Duration::from_millis(20)));
    let loader = backend_loader(Arc::clone(&backend), Duration::from_millis(10));
    let cache = Cache::with_loader(&test_config(), loader).unwrap();

    let tasks = (0..10_000).map(|_| {
        let cache = cache.clone();
        tokio::spawn(async move {
            let key = "key3".to_owned();
            cache.get(&key).await;
            tokio::time::sleep(Duration::from_millis(15)).await;
            cache.get(&key).await;
            tokio::time::sleep(Duration::from_millis(20)).await;
            cache.get(&key).await;
            tokio::time::sleep(Duration::from_millis(25)).await;
            cache.get(&key).await;
            tokio::time::sleep(Duration::from_millis(15)).await;
            cache.get(&key).await;
        })
    });
    for task in join_all(tasks).await {
        task.unwrap();
    }

    // 50_000 lookups, but only a handful of them actually went to the backend
    let calls = backend.calls("key3");
    assert!(calls >= 1);
    assert!(calls <= 20, "backend was called {calls} times");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_distinct_keys_load_independently() {
    setup();

    let backend = Arc::new(MockBackend::with_latency(Duration::from_millis(20)));
    let loader = backend_loader(Arc::clone(&backend), Duration::ZERO);
    let cache = Cache::with_loader(&test_config(), loader).unwrap();

    let tasks = (0..100).map(|i| {
        let cache = cache.clone();
        tokio::spawn(async move { cache.get(&format!("key{}", i % 4)).await })
    });
    for result in join_all(tasks).await {
        assert_eq!(result.unwrap(), Some(0));
    }

    for i in 0..4 {
        assert_eq!(backend.calls(&format!("key{i}")), 1);
    }
}
