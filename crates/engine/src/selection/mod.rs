//! The user's set of selected files.
//!
//! Selection holds file ids only, in the order they were picked. Selecting a
//! folder is a transient action: it walks the folder's descendants (listing
//! any that are not cached yet) and applies the outcome to the files in one
//! step. A folder id itself never stays in the set.

pub mod error;

use crate::reconcile::IndexStatus;
use crate::selection::error::{ErrorKind, Result};
use exn::ResultExt;
use indexmap::IndexSet;
use kbsync_cache::{FolderCache, FolderKey};
use kbsync_config::SelectionConfig;
use kbsync_remote::{Resource, ResourceId};
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::instrument;

/// What a folder toggle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderToggle {
    /// Every descendant file is now selected; `n` were added.
    Selected(usize),
    /// Every descendant file was already selected; `n` were removed.
    Deselected(usize),
    /// The folder has no descendant files.
    Empty,
}

pub struct Selection {
    cache: FolderCache,
    selected: Mutex<IndexSet<ResourceId>>,
    max_nodes: usize,
}

impl Selection {
    pub fn new(cache: FolderCache, config: &SelectionConfig) -> Self {
        Self { cache, selected: Mutex::new(IndexSet::new()), max_nodes: config.max_nodes }
    }

    fn lock(&self) -> MutexGuard<'_, IndexSet<ResourceId>> {
        self.selected.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Flip one id. Returns `true` if it is now selected.
    pub fn toggle(&self, id: &ResourceId) -> bool {
        let mut selected = self.lock();
        if selected.shift_remove(id) {
            false
        } else {
            selected.insert(id.clone());
            true
        }
    }

    pub fn select(&self, id: &ResourceId) -> bool {
        self.lock().insert(id.clone())
    }

    pub fn deselect(&self, id: &ResourceId) -> bool {
        self.lock().shift_remove(id)
    }

    pub fn is_selected(&self, id: &ResourceId) -> bool {
        self.lock().contains(id)
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Selected ids in the order they were added.
    pub fn selected_ids(&self) -> Vec<ResourceId> {
        self.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Selected ids whose current status is [`IndexStatus::Indexed`].
    pub fn indexed(&self, status_of: impl Fn(&ResourceId) -> IndexStatus) -> Vec<ResourceId> {
        self.lock().iter().filter(|id| status_of(id) == IndexStatus::Indexed).cloned().collect()
    }

    /// Select or deselect every file below `folder`.
    ///
    /// If all descendant files are already selected they are all removed,
    /// otherwise the missing ones are added. Uncached descendant folders are
    /// listed first; if any listing fails, or the walk exceeds the configured
    /// node limit, the selection is left untouched. A file passed here is
    /// toggled on its own.
    #[instrument(level = "debug", skip(self, folder), fields(folder = %folder.id))]
    pub async fn toggle_folder(&self, folder: &Resource) -> Result<FolderToggle> {
        if !folder.is_dir() {
            return Ok(match self.toggle(&folder.id) {
                true => FolderToggle::Selected(1),
                false => FolderToggle::Deselected(1),
            });
        }
        let files = self.descendant_files(&folder.id).await?;

        let mut selected = self.lock();
        selected.shift_remove(&folder.id);
        if files.is_empty() {
            return Ok(FolderToggle::Empty);
        }
        let outcome = if files.iter().all(|id| selected.contains(id)) {
            let remove: HashSet<&ResourceId> = files.iter().collect();
            selected.retain(|id| !remove.contains(id));
            FolderToggle::Deselected(files.len())
        } else {
            let before = selected.len();
            selected.extend(files);
            FolderToggle::Selected(selected.len() - before)
        };
        tracing::debug!(?outcome, total = selected.len(), "Folder toggled");
        Ok(outcome)
    }

    /// Every file below `folder`, in listing order, folders' own files
    /// before those of their subfolders.
    ///
    /// Uses an explicit worklist so depth is bounded only by the node limit.
    pub async fn descendant_files(&self, folder: &ResourceId) -> Result<Vec<ResourceId>> {
        let mut files = Vec::new();
        let mut visited: HashSet<ResourceId> = HashSet::new();
        let mut worklist = vec![folder.clone()];
        let mut nodes = 0usize;
        while let Some(current) = worklist.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }
            let entry = self
                .cache
                .ensure_loaded(FolderKey::from(&current))
                .await
                .or_raise(|| ErrorKind::Fetch(folder.to_string()))?;
            nodes += entry.children.len();
            if nodes > self.max_nodes {
                tracing::warn!(%folder, limit = self.max_nodes, "Folder selection refused; too many descendants");
                exn::bail!(ErrorKind::SelectionTooLarge { folder: folder.to_string(), limit: self.max_nodes });
            }
            files.extend(entry.children.iter().filter(|child| !child.is_dir()).map(|child| child.id.clone()));
            let subfolders: Vec<ResourceId> = entry.directories().map(|child| child.id.clone()).collect();
            worklist.extend(subfolders.into_iter().rev());
        }
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kbsync_config::CacheConfig;
    use kbsync_remote::backend::MockRemote;
    use std::sync::Arc;
    use std::time::Duration;
    use time::OffsetDateTime;

    fn selection(remote: &Arc<MockRemote>, max_nodes: usize) -> Selection {
        let cache = FolderCache::new(remote.clone(), &CacheConfig { prefetch: false });
        Selection::new(cache, &SelectionConfig { max_nodes })
    }

    fn folder(id: &str) -> Resource {
        Resource::directory(id, id, OffsetDateTime::UNIX_EPOCH)
    }

    fn ids(ids: &[&str]) -> Vec<ResourceId> {
        ids.iter().copied().map(ResourceId::from).collect()
    }

    #[test]
    fn test_toggle_preserves_insertion_order() {
        let remote = Arc::new(MockRemote::default());
        let selection = selection(&remote, 100);
        for id in ["c", "a", "b"] {
            assert!(selection.toggle(&ResourceId::from(id)));
        }
        assert!(!selection.toggle(&ResourceId::from("a")));
        assert_eq!(selection.selected_ids(), ids(&["c", "b"]));
        selection.toggle(&ResourceId::from("a"));
        assert_eq!(selection.selected_ids(), ids(&["c", "b", "a"]));
    }

    #[tokio::test]
    async fn test_folder_toggle_selects_then_deselects_all() {
        let remote = Arc::new(MockRemote::with_tree(["d/", "d/1.txt", "d/sub/", "d/sub/2.txt", "d/3.txt"]));
        let selection = selection(&remote, 100);
        let outcome = selection.toggle_folder(&folder("d")).await.unwrap();
        assert_eq!(outcome, FolderToggle::Selected(3));
        assert_eq!(selection.selected_ids(), ids(&["d/1.txt", "d/3.txt", "d/sub/2.txt"]));
        assert!(!selection.is_selected(&ResourceId::from("d")));
        assert!(!selection.is_selected(&ResourceId::from("d/sub")));

        let outcome = selection.toggle_folder(&folder("d")).await.unwrap();
        assert_eq!(outcome, FolderToggle::Deselected(3));
        assert!(selection.is_empty());
    }

    #[tokio::test]
    async fn test_partially_selected_folder_selects_the_rest() {
        let remote = Arc::new(MockRemote::with_tree(["d/", "d/1.txt", "d/2.txt"]));
        let selection = selection(&remote, 100);
        selection.toggle(&ResourceId::from("other.txt"));
        selection.toggle(&ResourceId::from("d/2.txt"));
        let outcome = selection.toggle_folder(&folder("d")).await.unwrap();
        assert_eq!(outcome, FolderToggle::Selected(1));
        assert_eq!(selection.selected_ids(), ids(&["other.txt", "d/2.txt", "d/1.txt"]));
    }

    #[tokio::test]
    async fn test_mixed_cache_folder_loads_missing_listings() {
        // F has A cached, B uncached; selecting F must include B's files.
        let remote = Arc::new(MockRemote::with_tree(["f/", "f/a/", "f/a/1.txt", "f/b/", "f/b/2.txt", "f/b/3.txt"]));
        let selection = selection(&remote, 100);
        selection.cache.ensure_loaded(FolderKey::from(&ResourceId::from("f"))).await.unwrap();
        selection.cache.ensure_loaded(FolderKey::from(&ResourceId::from("f/a"))).await.unwrap();
        assert!(!selection.cache.contains(&FolderKey::from(&ResourceId::from("f/b"))));

        let outcome = selection.toggle_folder(&folder("f")).await.unwrap();
        assert_eq!(outcome, FolderToggle::Selected(3));
        assert_eq!(selection.selected_ids(), ids(&["f/a/1.txt", "f/b/2.txt", "f/b/3.txt"]));
        assert_eq!(remote.list_calls(Some("f/a")), 1);
        assert_eq!(remote.list_calls(Some("f/b")), 1);
    }

    #[tokio::test]
    async fn test_empty_folder_changes_nothing() {
        let remote = Arc::new(MockRemote::with_tree(["empty/", "empty/inner/"]));
        let selection = selection(&remote, 100);
        selection.toggle(&ResourceId::from("keep.txt"));
        assert_eq!(selection.toggle_folder(&folder("empty")).await.unwrap(), FolderToggle::Empty);
        assert_eq!(selection.selected_ids(), ids(&["keep.txt"]));
    }

    #[tokio::test]
    async fn test_folder_id_is_never_kept() {
        let remote = Arc::new(MockRemote::with_tree(["d/", "d/1.txt"]));
        let selection = selection(&remote, 100);
        selection.toggle(&ResourceId::from("d"));
        selection.toggle_folder(&folder("d")).await.unwrap();
        assert_eq!(selection.selected_ids(), ids(&["d/1.txt"]));
    }

    #[tokio::test]
    async fn test_too_large_folder_is_refused_without_partial_changes() {
        let remote = Arc::new(MockRemote::with_tree(["d/", "d/1.txt", "d/2.txt", "d/sub/", "d/sub/3.txt"]));
        let selection = selection(&remote, 3);
        selection.toggle(&ResourceId::from("d/1.txt"));
        let err = selection.toggle_folder(&folder("d")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::SelectionTooLarge { limit: 3, .. }));
        assert!(!err.is_retryable());
        assert_eq!(selection.selected_ids(), ids(&["d/1.txt"]));
    }

    #[tokio::test]
    async fn test_listing_failure_leaves_selection_untouched() {
        let remote = Arc::new(MockRemote::with_tree(["d/", "d/1.txt", "d/sub/", "d/sub/2.txt"]));
        remote.fail_listing(Some("d/sub"), true);
        let selection = selection(&remote, 100);
        let err = selection.toggle_folder(&folder("d")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Fetch(id) if id == "d"));
        assert!(selection.is_empty());
    }

    #[tokio::test]
    async fn test_file_passed_to_folder_toggle_flips_itself() {
        let remote = Arc::new(MockRemote::default());
        let selection = selection(&remote, 100);
        let file = Resource::file("a.txt", "a.txt", OffsetDateTime::UNIX_EPOCH);
        assert_eq!(selection.toggle_folder(&file).await.unwrap(), FolderToggle::Selected(1));
        assert_eq!(selection.toggle_folder(&file).await.unwrap(), FolderToggle::Deselected(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_selection_stays_usable_while_folder_loads() {
        let remote = Arc::new(MockRemote::with_tree(["d/", "d/1.txt"]).with_latency(Duration::from_millis(100)));
        let selection = selection(&remote, 100);
        let d = folder("d");
        let toggling = selection.toggle_folder(&d);
        let meanwhile = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            selection.toggle(&ResourceId::from("x.txt"));
        };
        let (outcome, ()) = tokio::join!(toggling, meanwhile);
        assert_eq!(outcome.unwrap(), FolderToggle::Selected(1));
        assert_eq!(selection.selected_ids(), ids(&["x.txt", "d/1.txt"]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_folder_toggles_resolve_concurrently() {
        let remote = Arc::new(
            MockRemote::with_tree(["d/", "d/1.txt", "e/", "e/2.txt"]).with_latency(Duration::from_millis(100)),
        );
        let selection = selection(&remote, 100);
        let folders = [folder("d"), folder("e")];
        let started = tokio::time::Instant::now();
        let outcomes = futures::future::join_all(folders.iter().map(|f| selection.toggle_folder(f))).await;
        assert!(started.elapsed() < Duration::from_millis(200));
        for outcome in outcomes {
            assert_eq!(outcome.unwrap(), FolderToggle::Selected(1));
        }
        assert!(selection.is_selected(&ResourceId::from("d/1.txt")));
        assert!(selection.is_selected(&ResourceId::from("e/2.txt")));
        assert_eq!((remote.list_calls(Some("d")), remote.list_calls(Some("e"))), (1, 1));
    }

    #[test]
    fn test_indexed_filters_by_status() {
        let remote = Arc::new(MockRemote::default());
        let selection = selection(&remote, 100);
        for id in ["a", "b", "c"] {
            selection.toggle(&ResourceId::from(id));
        }
        let indexed = selection.indexed(|id| match id.as_str() {
            "b" => IndexStatus::Pending,
            _ => IndexStatus::Indexed,
        });
        assert_eq!(indexed, ids(&["a", "c"]));
    }
}
