use crate::error::{ErrorKind, Result};
use crate::{FolderEntry, FolderKey};
use kbsync_asyncutils::{Flight, SingleFlight};
use kbsync_config::CacheConfig;
use kbsync_remote::error::ErrorKind as RemoteErrorKind;
use kbsync_remote::{RemoteHandle, Resource, ResourceId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::instrument;

/// What every waiter of one listing request receives.
type Listing = std::result::Result<Arc<FolderEntry>, RemoteErrorKind>;

/// Whether a successful listing warms the cache for its child directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cascade {
    Children,
    Stop,
}

struct Inner {
    remote: RemoteHandle,
    entries: RwLock<HashMap<FolderKey, Arc<FolderEntry>>>,
    flights: SingleFlight<FolderKey, Listing>,
    /// Bumped by `clear()`; listings started under an older generation are
    /// handed to their waiters but never stored.
    generation: AtomicU64,
    prefetch_children: bool,
}

/// Per-connection folder cache with request de-duplication and speculative
/// prefetch.
///
/// Cheap to clone; clones share the same entries and in-flight requests.
///
/// # Examples
///
/// ```
/// use kbsync_cache::{FolderCache, FolderKey};
/// use kbsync_config::CacheConfig;
/// use kbsync_remote::backend::MockRemote;
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let remote = Arc::new(MockRemote::with_tree(["docs/", "docs/a.txt"]));
/// let cache = FolderCache::new(remote, &CacheConfig { prefetch: false });
///
/// let root = cache.ensure_loaded(FolderKey::Root).await?;
/// assert_eq!(root.children[0].name(), "docs");
/// assert!(cache.get(&FolderKey::Root).is_some());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct FolderCache {
    inner: Arc<Inner>,
}

impl FolderCache {
    pub fn new(remote: RemoteHandle, config: &CacheConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                remote,
                entries: RwLock::new(HashMap::new()),
                flights: SingleFlight::new(),
                generation: AtomicU64::new(0),
                prefetch_children: config.prefetch,
            }),
        }
    }

    pub fn remote(&self) -> &RemoteHandle {
        &self.inner.remote
    }

    /// Cached listing, if the folder has been fetched.
    pub fn get(&self, key: &FolderKey) -> Option<Arc<FolderEntry>> {
        self.inner.entries.read().unwrap_or_else(PoisonError::into_inner).get(key).cloned()
    }

    /// Cached children of a folder, if it has been fetched.
    pub fn children(&self, folder: &ResourceId) -> Option<Arc<[Resource]>> {
        let entries = self.inner.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(&FolderKey::Folder(folder.clone())).map(|entry| Arc::clone(&entry.children))
    }

    pub fn contains(&self, key: &FolderKey) -> bool {
        self.inner.entries.read().unwrap_or_else(PoisonError::into_inner).contains_key(key)
    }

    /// A listing request for the folder is outstanding.
    pub fn is_loading(&self, key: &FolderKey) -> bool {
        self.inner.flights.is_running(key)
    }

    /// Number of cached folders.
    pub fn len(&self) -> usize {
        self.inner.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the cached listing, fetching it first if necessary.
    ///
    /// Concurrent calls for the same folder share one request and observe the
    /// same outcome. On failure nothing is cached, so a later call retries.
    /// A successful fetch prefetches the folder's child directories (one
    /// level, best-effort) unless disabled in [`CacheConfig`].
    #[instrument(level = "debug", skip(self), fields(connection = self.inner.remote.connection()))]
    pub async fn ensure_loaded(&self, key: FolderKey) -> Result<Arc<FolderEntry>> {
        if let Some(entry) = self.get(&key) {
            tracing::trace!("Cache hit");
            return Ok(entry);
        }
        self.fetch(key.clone(), Cascade::Children, true)
            .await
            .map_err(|kind| exn::Exn::from(kind).raise(ErrorKind::FetchFailed(key)))
    }

    /// Warm the cache for a folder without waiting for the result.
    ///
    /// Errors are logged and swallowed; the folder simply stays uncached.
    /// Prefetched listings do not cascade further down the tree. Outside of a
    /// Tokio runtime this does nothing.
    pub fn prefetch(&self, key: FolderKey) {
        if self.contains(&key) || self.is_loading(&key) {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!(folder = %key, "No runtime available; skipping prefetch");
            return;
        };
        let flight = self.fetch(key.clone(), Cascade::Stop, true);
        runtime.spawn(async move {
            if let Err(err) = flight.await {
                tracing::debug!(folder = %key, error = %err, "Prefetch failed");
            }
        });
    }

    /// Fetch the folder again and replace its entry, whether it was cached or
    /// not. Joins an outstanding request instead of starting a second one.
    #[instrument(level = "debug", skip(self), fields(connection = self.inner.remote.connection()))]
    pub async fn refresh(&self, key: FolderKey) -> Result<Arc<FolderEntry>> {
        self.fetch(key.clone(), Cascade::Stop, false)
            .await
            .map_err(|kind| exn::Exn::from(kind).raise(ErrorKind::FetchFailed(key)))
    }

    /// Drop every entry. Requests already in flight still answer their
    /// waiters, but their results are not stored.
    pub fn clear(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.flights.forget();
        self.inner.entries.write().unwrap_or_else(PoisonError::into_inner).clear();
        tracing::debug!(connection = self.inner.remote.connection(), "Folder cache cleared");
    }

    fn fetch(&self, key: FolderKey, cascade: Cascade, reuse_cached: bool) -> Flight<Listing> {
        let cache = self.clone();
        self.inner.flights.run(key.clone(), move || async move {
            // The entry may have landed between the caller's lookup and
            // this flight starting.
            if reuse_cached && let Some(entry) = cache.get(&key) {
                return Ok(entry);
            }
            cache.load(key, cascade).await
        })
    }

    async fn load(&self, key: FolderKey, cascade: Cascade) -> Listing {
        let generation = self.inner.generation.load(Ordering::SeqCst);
        let children = match self.inner.remote.list_children(key.id()).await {
            Ok(children) => children,
            Err(err) => {
                tracing::warn!(folder = %key, error = %err, "Folder listing failed");
                return Err((*err).clone());
            },
        };
        let entry = Arc::new(FolderEntry::new(children));
        tracing::debug!(folder = %key, children = entry.children.len(), "Folder listed");
        if self.inner.generation.load(Ordering::SeqCst) == generation {
            self.inner.entries.write().unwrap_or_else(PoisonError::into_inner).insert(key, Arc::clone(&entry));
        } else {
            tracing::debug!(folder = %key, "Discarding listing started before the cache was cleared");
        }
        if cascade == Cascade::Children && self.inner.prefetch_children {
            for directory in entry.directories() {
                self.prefetch(FolderKey::from(&directory.id));
            }
        }
        Ok(entry)
    }
}
