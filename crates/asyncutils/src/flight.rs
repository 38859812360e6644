use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Handle to an in-flight request. Cloning it (or awaiting several clones)
/// never starts a second request.
pub type Flight<V> = Shared<BoxFuture<'static, V>>;

struct Entry<V> {
    generation: u64,
    flight: Flight<V>,
}

/// Keyed request coalescing.
///
/// At most one future per key is in flight at any time. Callers asking for a
/// key that is already running receive a clone of the same [`Shared`] future
/// and therefore the same output, which is why `V` must be [`Clone`]. The
/// entry is removed as the last step of the future itself, so the work
/// wrapped by [`run()`](Self::run) should publish its result (e.g. fill a
/// cache) *before* it returns.
///
/// If every caller drops its handle before completion the entry lingers
/// until the next caller for that key picks it up and drives it to the end.
///
/// # Examples
///
/// ```
/// use kbsync_asyncutils::SingleFlight;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let flights: SingleFlight<&str, u32> = SingleFlight::new();
/// let a = flights.run("answer", || async { 42 });
/// let b = flights.run("answer", || async { unreachable!("already in flight") });
/// assert_eq!((a.await, b.await), (42, 42));
/// assert!(!flights.is_running(&"answer"));
/// # }
/// ```
pub struct SingleFlight<K, V> {
    inflight: Arc<Mutex<HashMap<K, Entry<V>>>>,
    generation: Arc<AtomicU64>,
}
impl<K, V> Clone for SingleFlight<K, V> {
    fn clone(&self) -> Self {
        Self {
            inflight: Arc::clone(&self.inflight),
            generation: Arc::clone(&self.generation),
        }
    }
}
impl<K, V> Default for SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

fn lock<K, V>(map: &Mutex<HashMap<K, Entry<V>>>) -> MutexGuard<'_, HashMap<K, Entry<V>>> {
    map.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Join the flight for `key`, or start one from `make` if none is running.
    ///
    /// `make` is only invoked when a new flight starts. Nothing runs until the
    /// returned future is polled (or spawned).
    pub fn run<F>(&self, key: K, make: impl FnOnce() -> F) -> Flight<V>
    where
        F: Future<Output = V> + Send + 'static,
    {
        let mut inflight = lock(&self.inflight);
        if let Some(entry) = inflight.get(&key) {
            return entry.flight.clone();
        }
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let work = make();
        let map = Arc::clone(&self.inflight);
        let owned_key = key.clone();
        let flight = async move {
            let output = work.await;
            let mut inflight = lock(&map);
            // A `forget()` may have let a newer flight take this key.
            if inflight.get(&owned_key).is_some_and(|entry| entry.generation == generation) {
                inflight.remove(&owned_key);
            }
            output
        }
        .boxed()
        .shared();
        inflight.insert(key, Entry { generation, flight: flight.clone() });
        flight
    }

    pub fn is_running(&self, key: &K) -> bool {
        lock(&self.inflight).contains_key(key)
    }

    pub fn len(&self) -> usize {
        lock(&self.inflight).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop handing out the current flights. Flights already joined still
    /// complete for the callers holding them; the next [`run()`](Self::run)
    /// for any key starts fresh.
    pub fn forget(&self) {
        lock(&self.inflight).clear();
    }
}
