use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};

use flightcache::config::CacheConfig;
use flightcache::{Cache, CancellationToken, Loaded, loader_fn};

#[derive(Debug, Deserialize, Serialize)]
pub struct WorkloadsConfig {
    pub workloads: Vec<Workload>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Workload {
    /// Number of lookups running at the same time.
    pub concurrency: usize,
    /// Number of distinct keys the lookups are spread over.
    pub keys: u64,
    /// How long the simulated backend takes per load.
    #[serde(default, with = "humantime_serde")]
    pub load_latency: Duration,
    /// TTL of loaded values. Zero means they never expire.
    #[serde(default, with = "humantime_serde")]
    pub ttl: Duration,
    /// Cost of every loaded value.
    #[serde(default = "default_cost")]
    pub cost: u32,
}

fn default_cost() -> u32 {
    1
}

/// A cache in front of a simulated backend, ready to be hammered.
pub struct PreparedWorkload {
    pub concurrency: usize,
    pub keys: u64,
    pub cache: Cache<u64, Arc<str>>,
    /// Number of times the backend was actually called.
    pub loads: Arc<AtomicUsize>,
}

impl PreparedWorkload {
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }
}

pub fn prepare_workload(
    cache_config: &CacheConfig,
    index: usize,
    workload: Workload,
) -> Result<PreparedWorkload> {
    anyhow::ensure!(workload.keys > 0, "workload {index} needs at least one key");
    anyhow::ensure!(
        workload.concurrency > 0,
        "workload {index} needs a concurrency of at least one"
    );

    let config = CacheConfig {
        name: format!("{}-{index}", cache_config.name),
        ..cache_config.clone()
    };

    let loads = Arc::new(AtomicUsize::new(0));
    let Workload {
        concurrency,
        keys,
        load_latency,
        ttl,
        cost,
    } = workload;

    let loader = loader_fn({
        let loads = Arc::clone(&loads);
        move |cancel: CancellationToken, key: u64| {
            let loads = Arc::clone(&loads);
            async move {
                loads.fetch_add(1, Ordering::Relaxed);
                tokio::select! {
                    _ = tokio::time::sleep(load_latency) => {}
                    _ = cancel.cancelled() => anyhow::bail!("cache closed while loading {key}"),
                }
                let value: Arc<str> = format!("value-{key}").into();
                Ok(Loaded::new(value, cost).with_ttl(ttl))
            }
        }
    });
    let cache = Cache::with_loader(&config, loader)
        .with_context(|| format!("invalid cache config for workload {index}"))?;

    Ok(PreparedWorkload {
        concurrency,
        keys,
        cache,
        loads,
    })
}

/// Looks up one random key of the workload.
pub async fn process_workload(cache: &Cache<u64, Arc<str>>, keys: u64) -> bool {
    let key = rand::rng().random_range(0..keys);
    cache.get(&key).await.is_some()
}
