use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::channel::oneshot;
use futures::future::{FutureExt, Shared};

use crate::error::{LoadError, LoadResult};
use crate::utils::{CallOnDrop, panic_message};

// `Shared` hands out clones of the output, so every follower gets the same value (or the
// same `Arc`-ed error) the leader produced.
type Flight<V> = Shared<oneshot::Receiver<LoadResult<V>>>;

type FlightMap<K, V> = Arc<Mutex<HashMap<K, Flight<V>>>>;

/// The part a caller plays in one load generation.
enum Role<V> {
    /// Runs the work and publishes the result through the sender.
    Leader(oneshot::Sender<LoadResult<V>>),
    /// Waits for the leader's result.
    Follower(Flight<V>),
}

/// Deduplicates concurrent loads of the same key.
///
/// The first caller of [`run_once`](Self::run_once) for a key becomes the *leader* of a load
/// generation and runs the work itself. Everybody else arriving for that key while the work
/// is running becomes a *follower*: they never run their own work, but wait for the leader
/// and get a clone of its result.
///
/// Once the leader is done, the key is removed from the registry before the result is
/// published, so the next caller for that key starts a fresh generation.
pub struct Coalescer<K, V> {
    /// Currently running loads, keyed by the key being loaded.
    in_flight: FlightMap<K, V>,
}

impl<K, V> Clone for Coalescer<K, V> {
    fn clone(&self) -> Self {
        Self {
            in_flight: Arc::clone(&self.in_flight),
        }
    }
}

impl<K, V> Default for Coalescer<K, V> {
    fn default() -> Self {
        Self {
            in_flight: Default::default(),
        }
    }
}

impl<K, V> fmt::Debug for Coalescer<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let running = self
            .in_flight
            .try_lock()
            .map(|flights| flights.len())
            .unwrap_or_default();
        f.debug_struct("Coalescer")
            .field("running loads", &running)
            .finish()
    }
}

impl<K, V> Coalescer<K, V>
where
    K: Hash + Eq + Clone + Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Creates a coalescer without any running loads.
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of keys that currently have a load running.
    pub fn in_flight(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, Flight<V>>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Atomically joins the running load for `key`, or registers a new one.
    fn register(&self, key: &K) -> Role<V> {
        let mut in_flight = self.lock();
        if let Some(flight) = in_flight.get(key) {
            return Role::Follower(flight.clone());
        }

        let (sender, receiver) = oneshot::channel();
        in_flight.insert(key.clone(), receiver.shared());
        Role::Leader(sender)
    }

    /// Runs `work` for `key`, unless a run for the same key is already in progress.
    ///
    /// The leader drives `work` from within this call, no task is spawned. Followers wait for
    /// as long as the leader's work runs, as there is no timeout.
    ///
    /// # Errors
    ///
    /// - [`LoadError::Failed`] if `work` returned an error.
    /// - [`LoadError::Panicked`] if `work` panicked. The panic does not propagate.
    /// - [`LoadError::Abandoned`] for followers whose leader was dropped before finishing.
    pub async fn run_once<F, Fut>(&self, key: K, work: F) -> LoadResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<V>>,
    {
        let sender = match self.register(&key) {
            Role::Leader(sender) => sender,
            Role::Follower(flight) => {
                tracing::trace!("Joining in-flight load");
                return flight
                    .await
                    .unwrap_or_else(|_canceled| Err(LoadError::Abandoned));
            }
        };

        // Runs on completion, and also when this future is dropped halfway through. In the
        // latter case `sender` is dropped too, which wakes all followers with `Abandoned`.
        let done_token = {
            let in_flight = Arc::clone(&self.in_flight);
            CallOnDrop::new(move || {
                in_flight
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&key);
            })
        };

        let result = match AssertUnwindSafe(async move { work().await })
            .catch_unwind()
            .await
        {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(LoadError::from(err)),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(panic = %message, "Coalesced load panicked");
                Err(LoadError::Panicked(message))
            }
        };

        // Drop the token first to evict from the map. This ensures that callers either
        // get a flight that will receive data, or they start a new one.
        drop(done_token);
        sender.send(result.clone()).ok();

        result
    }
}
