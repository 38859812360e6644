use crate::error::{ErrorKind, Result};
use crate::reconcile::{BatchId, IndexStatus, ReconcileEvent, Reconciler};
use crate::selection::{FolderToggle, Selection};
use crate::tree::{ExpansionSet, Sort, TreeRow, project};
use exn::ResultExt;
use kbsync_cache::{FolderCache, FolderEntry, FolderKey};
use kbsync_config::Config;
use kbsync_remote::{JobId, RemoteHandle, Resource, ResourceId};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::instrument;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One connection plus one active job.
///
/// Owns the folder cache, expansion set, selection and status map. Nothing
/// here is shared with other sessions.
///
/// # Examples
///
/// ```
/// use kbsync_config::Config;
/// use kbsync_engine::{FolderToggle, Session};
/// use kbsync_remote::backend::MockRemote;
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let remote = Arc::new(MockRemote::with_tree(["docs/", "docs/a.txt", "docs/b.txt"]));
/// let session = Session::open(remote, "kb".into(), &Config::default());
///
/// let root = session.load_root().await?;
/// assert_eq!(session.toggle_folder(&root.children[0]).await?, FolderToggle::Selected(2));
/// assert_eq!(session.selected_ids().len(), 2);
/// session.close().await;
/// # Ok(())
/// # }
/// ```
pub struct Session {
    cache: FolderCache,
    expanded: Mutex<ExpansionSet>,
    sort: Mutex<Sort>,
    selection: Selection,
    reconciler: Reconciler,
}

impl Session {
    pub fn open(remote: RemoteHandle, job: JobId, config: &Config) -> Self {
        tracing::info!(connection = remote.connection(), %job, "Opening session");
        let cache = FolderCache::new(Arc::clone(&remote), &config.cache);
        Self {
            selection: Selection::new(cache.clone(), &config.selection),
            reconciler: Reconciler::new(remote, job, &config.reconcile),
            expanded: Mutex::new(ExpansionSet::new()),
            sort: Mutex::new(Sort::default()),
            cache,
        }
    }

    pub fn connection(&self) -> &str {
        self.cache.remote().connection()
    }

    pub fn job(&self) -> &JobId {
        self.reconciler.job()
    }

    pub fn cache(&self) -> &FolderCache {
        &self.cache
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Pull the job's current statuses, then keep resyncing in the
    /// background until the session is closed.
    pub async fn start(&self) -> Result<()> {
        self.reconciler.resync().await.or_raise(|| ErrorKind::Reconcile)?;
        self.reconciler.start_resync();
        Ok(())
    }

    pub async fn load_root(&self) -> Result<Arc<FolderEntry>> {
        self.cache.ensure_loaded(FolderKey::Root).await.or_raise(|| ErrorKind::Cache)
    }

    pub async fn load_folder(&self, folder: &ResourceId) -> Result<Arc<FolderEntry>> {
        self.cache.ensure_loaded(FolderKey::from(folder)).await.or_raise(|| ErrorKind::Cache)
    }

    /// Visible rows for the current root listing, expansion set and sort.
    /// Empty until the root has been loaded.
    pub fn rows(&self) -> Vec<TreeRow> {
        let Some(root) = self.cache.get(&FolderKey::Root) else {
            return Vec::new();
        };
        let expanded = lock(&self.expanded);
        project(&root.children, &self.cache, &expanded, *lock(&self.sort))
    }

    pub fn sort(&self) -> Sort {
        *lock(&self.sort)
    }

    pub fn set_sort(&self, sort: Sort) {
        *lock(&self.sort) = sort;
    }

    pub fn is_expanded(&self, folder: &ResourceId) -> bool {
        lock(&self.expanded).contains(folder)
    }

    /// Expand or collapse a folder row. Returns `true` if it is now expanded.
    ///
    /// Expanding loads the folder (and warms its subfolders) unless it is
    /// cached. If that load fails the folder is collapsed again. Collapsing
    /// never touches the cache.
    #[instrument(level = "debug", skip(self), fields(%folder))]
    pub async fn toggle_expanded(&self, folder: &ResourceId) -> Result<bool> {
        if !lock(&self.expanded).toggle(folder) {
            return Ok(false);
        }
        match self.load_folder(folder).await {
            Ok(_) => Ok(true),
            Err(err) => {
                lock(&self.expanded).collapse(folder);
                Err(err)
            },
        }
    }

    /// Expand a folder (leaving it expanded if it already is), loading it
    /// if needed. Ancestors are not expanded.
    pub async fn expand(&self, folder: &ResourceId) -> Result<()> {
        let newly = lock(&self.expanded).expand(folder);
        if let Err(err) = self.load_folder(folder).await {
            if newly {
                lock(&self.expanded).collapse(folder);
            }
            return Err(err);
        }
        Ok(())
    }

    /// Expand every folder reachable from the root, loading each in turn.
    pub async fn expand_all(&self) -> Result<()> {
        let root = self.load_root().await?;
        let mut worklist: Vec<ResourceId> = root.directories().map(|dir| dir.id.clone()).collect();
        let mut visited: HashSet<ResourceId> = HashSet::new();
        while let Some(folder) = worklist.pop() {
            if !visited.insert(folder.clone()) {
                continue;
            }
            lock(&self.expanded).expand(&folder);
            let entry = self.load_folder(&folder).await?;
            worklist.extend(entry.directories().map(|dir| dir.id.clone()));
        }
        Ok(())
    }

    pub fn collapse_all(&self) {
        lock(&self.expanded).clear();
    }

    pub fn toggle(&self, id: &ResourceId) -> bool {
        self.selection.toggle(id)
    }

    pub async fn toggle_folder(&self, folder: &Resource) -> Result<FolderToggle> {
        self.selection.toggle_folder(folder).await.or_raise(|| ErrorKind::Selection)
    }

    pub fn selected_ids(&self) -> Vec<ResourceId> {
        self.selection.selected_ids()
    }

    pub fn clear_selection(&self) {
        self.selection.clear();
    }

    /// Submit every selected file for indexing.
    pub async fn index_selection(&self) -> Result<Option<BatchId>> {
        let ids = self.selection.selected_ids();
        self.reconciler.request_index(&ids).await.or_raise(|| ErrorKind::Reconcile)
    }

    /// Remove every selected file that is currently indexed from the job.
    /// Returns how many were submitted.
    pub async fn deindex_selection(&self) -> Result<usize> {
        let ids = self.selection.indexed(|id| self.reconciler.status(id));
        if ids.is_empty() {
            return Ok(0);
        }
        self.reconciler.request_de_index(&ids).await.or_raise(|| ErrorKind::Reconcile)?;
        Ok(ids.len())
    }

    pub fn status(&self, id: &ResourceId) -> IndexStatus {
        self.reconciler.status(id)
    }

    pub fn statuses(&self) -> HashMap<ResourceId, IndexStatus> {
        self.reconciler.statuses()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReconcileEvent> {
        self.reconciler.subscribe()
    }

    /// Stop polling and resyncing, and drop everything cached.
    pub async fn close(self) {
        self.reconciler.shutdown().await;
        self.cache.clear();
        tracing::info!(connection = self.connection(), job = %self.job(), "Session closed");
    }
}
