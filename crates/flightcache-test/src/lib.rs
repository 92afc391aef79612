//! Helpers for testing the cache.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - [`MockBackend`] does not know about the cache at all. Wrap it in a loader closure and
//!    assert on [`MockBackend::calls`] to find out how often the cache actually went to it.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `flightcache` crate and mutes all
///    other logs (such as moka).
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("flightcache=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// A fake data source that hands out an incrementing number per key.
///
/// The first fetch of a key returns `0`, the next one `1`, and so on, which makes every
/// trip to the backend observable in the returned values.
#[derive(Debug, Default)]
pub struct MockBackend {
    counters: Mutex<HashMap<String, i64>>,
    latency: Duration,
}

impl MockBackend {
    /// Creates a backend that answers immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend that takes `latency` to answer every fetch.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Default::default()
        }
    }

    /// Fetches the next number for `key`.
    pub async fn fetch(&self, key: &str) -> i64 {
        let value = {
            let mut counters = self.counters.lock().unwrap();
            let counter = counters.entry(key.to_owned()).or_insert(-1);
            *counter += 1;
            *counter
        };
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        value
    }

    /// How many times `key` has been fetched.
    pub fn calls(&self, key: &str) -> usize {
        let counters = self.counters.lock().unwrap();
        counters.get(key).map_or(0, |counter| (*counter + 1) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_backend_counts_per_key() {
        let backend = MockBackend::new();

        assert_eq!(backend.fetch("a").await, 0);
        assert_eq!(backend.fetch("a").await, 1);
        assert_eq!(backend.fetch("b").await, 0);

        assert_eq!(backend.calls("a"), 2);
        assert_eq!(backend.calls("b"), 1);
        assert_eq!(backend.calls("c"), 0);
    }
}
