use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct Task {
    generation: u64,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

struct Inner<K> {
    tasks: HashMap<K, Task>,
    next_generation: u64,
}

/// Keyed, cancellable background tasks.
///
/// Each task gets a child of the set's root [`CancellationToken`] and is
/// raced against it, so cancelling never depends on the task cooperating.
/// Spawning under a key that is already running cancels the older task.
/// Dropping the set cancels everything it still owns.
///
/// Must be used from within a Tokio runtime.
pub struct TaskSet<K: Eq + Hash> {
    inner: Arc<Mutex<Inner<K>>>,
    root: CancellationToken,
}

fn lock<K>(inner: &Mutex<Inner<K>>) -> MutexGuard<'_, Inner<K>> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<K> Default for TaskSet<K>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> TaskSet<K>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner { tasks: HashMap::new(), next_generation: 0 })),
            root: CancellationToken::new(),
        }
    }

    /// Spawn `task` under `key`, replacing (and cancelling) any task already
    /// registered there. The task receives its own cancellation token for
    /// cleanup-aware shutdown.
    pub fn spawn<F>(&self, key: K, task: impl FnOnce(CancellationToken) -> F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = self.root.child_token();
        let future = task(token.clone());
        // Holding the lock while spawning guarantees the task's own
        // deregistration below cannot run before it is registered.
        let mut inner = lock(&self.inner);
        let generation = inner.next_generation;
        inner.next_generation += 1;
        let registry = Arc::clone(&self.inner);
        let owned_key = key.clone();
        let cancel = token.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => tracing::debug!(key = ?owned_key, "Task cancelled"),
                _ = future => {},
            }
            let mut inner = lock(&registry);
            if inner.tasks.get(&owned_key).is_some_and(|t| t.generation == generation) {
                inner.tasks.remove(&owned_key);
            }
        });
        if let Some(previous) = inner.tasks.insert(key, Task { generation, token, handle }) {
            previous.token.cancel();
        }
    }

    /// Cancel the task registered under `key`. Returns `false` if there was
    /// none.
    pub fn cancel(&self, key: &K) -> bool {
        match lock(&self.inner).tasks.remove(key) {
            Some(task) => {
                task.token.cancel();
                true
            },
            None => false,
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        lock(&self.inner).tasks.contains_key(key)
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel every task and wait for all of them to stop. Tasks spawned
    /// afterwards are cancelled immediately.
    pub async fn shutdown(&self) {
        self.root.cancel();
        let handles: Vec<_> = lock(&self.inner).tasks.drain().map(|(_, task)| task.handle).collect();
        for handle in handles {
            if let Err(err) = handle.await
                && err.is_panic()
            {
                tracing::warn!(error = %err, "Background task panicked");
            }
        }
    }

    /// Wait until every task currently registered has finished on its own.
    pub async fn join(&self) {
        loop {
            let handle = {
                let mut inner = lock(&self.inner);
                let Some(key) = inner.tasks.keys().next().cloned() else { return };
                inner.tasks.remove(&key).map(|task| task.handle)
            };
            if let Some(handle) = handle {
                let _ = handle.await;
            }
        }
    }
}

impl<K: Eq + Hash> Drop for TaskSet<K> {
    fn drop(&mut self) {
        self.root.cancel();
    }
}
