use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use flightcache::{Cache, CancellationToken, LoadError, Loaded, loader_fn};
use flightcache_test::MockBackend;
use futures::future::join_all;

use crate::{backend_loader, setup, test_config};

#[tokio::test]
async fn test_set_get_delete() {
    setup();

    let cache = Cache::<String, &str>::new(&test_config()).unwrap();

    assert!(cache.set("key".into(), "value", 1).await);
    assert_eq!(cache.get(&"key".into()).await, Some("value"));

    cache.delete(&"key".into()).await;
    assert_eq!(cache.get(&"key".into()).await, None);

    // deleting a missing key is fine
    cache.delete(&"key".into()).await;
    assert_eq!(cache.get(&"key".into()).await, None);

    cache.close().await;
}

#[tokio::test]
async fn test_set_with_ttl_expires() {
    setup();

    let cache = Cache::<String, &str>::new(&test_config()).unwrap();

    assert!(
        cache
            .set_with_ttl("key2".into(), "value2", 1, Duration::from_millis(30))
            .await
    );

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(cache.get(&"key2".into()).await, Some("value2"));

    tokio::time::sleep(Duration::from_millis(25)).await;
    assert_eq!(cache.get(&"key2".into()).await, None);

    cache.close().await;
}

#[tokio::test]
async fn test_loader_fills_misses_until_expiry() {
    setup();

    let backend = Arc::new(MockBackend::new());
    let loader = backend_loader(Arc::clone(&backend), Duration::from_millis(10));
    let cache = Cache::with_loader(&test_config(), loader).unwrap();

    assert_eq!(cache.get(&"keyX".into()).await, Some(0));
    // still cached
    assert_eq!(cache.get(&"keyX".into()).await, Some(0));
    assert_eq!(backend.calls("keyX"), 1);

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(cache.get(&"keyX".into()).await, Some(1));
    assert_eq!(backend.calls("keyX"), 2);
}

#[tokio::test]
async fn test_delete_makes_loader_refill() {
    setup();

    let backend = Arc::new(MockBackend::new());
    let loader = backend_loader(Arc::clone(&backend), Duration::ZERO);
    let cache = Cache::with_loader(&test_config(), loader).unwrap();

    assert_eq!(cache.get(&"key".into()).await, Some(0));
    cache.delete(&"key".into()).await;
    assert_eq!(cache.get(&"key".into()).await, Some(1));
    assert_eq!(backend.calls("key"), 2);
}

#[tokio::test]
async fn test_load_failures_look_like_misses() {
    setup();

    let loader = loader_fn(|_cancel: CancellationToken, key: String| async move {
        anyhow::ensure!(key != "broken", "no such record: {key}");
        Ok(Loaded::new(key.len() as i64, 1))
    });
    let cache = Cache::with_loader(&test_config(), loader).unwrap();

    assert_eq!(cache.get(&"broken".into()).await, None);
    match cache.try_get(&"broken".into()).await {
        Err(LoadError::Failed(err)) => assert_eq!(err.to_string(), "no such record: broken"),
        other => panic!("unexpected result: {other:?}"),
    }

    assert_eq!(cache.try_get(&"fine".into()).await.unwrap(), Some(4));
    cache.run_pending_tasks().await;
    // failures are not cached
    assert_eq!(cache.entry_count(), 1);
}

#[tokio::test]
async fn test_try_get_without_loader() {
    setup();

    let cache = Cache::<String, i64>::new(&test_config()).unwrap();
    assert_eq!(cache.try_get(&"missing".into()).await.unwrap(), None);
}

#[tokio::test]
async fn test_close_cancels_running_load() {
    setup();

    let loader = loader_fn(|cancel: CancellationToken, _key: String| async move {
        cancel.cancelled().await;
        Err::<Loaded<i64>, _>(anyhow::anyhow!("cache closed"))
    });
    let cache = Cache::with_loader(&test_config(), loader).unwrap();

    let pending = tokio::spawn({
        let cache = cache.clone();
        async move { cache.try_get(&"key".into()).await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!pending.is_finished());

    cache.close().await;

    match pending.await.unwrap() {
        Err(LoadError::Failed(err)) => assert_eq!(err.to_string(), "cache closed"),
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(cache.get(&"key".into()).await, None);
}

#[tokio::test]
async fn test_panicking_load_releases_all_callers() {
    setup();

    let calls = Arc::new(AtomicUsize::new(0));
    let loader = loader_fn({
        let calls = Arc::clone(&calls);
        move |_cancel: CancellationToken, key: String| {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                if call == 0 {
                    panic!("backend crashed while loading {key}");
                }
                Ok::<_, anyhow::Error>(Loaded::new(call as i64, 1))
            }
        }
    });
    let cache = Cache::with_loader(&test_config(), loader).unwrap();

    let key = "key".to_owned();
    let results = join_all((0..50).map(|_| cache.get(&key))).await;
    assert!(results.iter().all(Option::is_none));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // the failed generation is gone, so the next lookup loads again
    assert_eq!(cache.get(&key).await, Some(1));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
