//! Flattening the cached hierarchy into display rows.
//!
//! [`project`] is a pure function of the root listing, the cache, the
//! expansion set and the sort order. It never fetches anything: a folder that
//! is expanded but not yet cached simply yields no child rows (and reports
//! [`FolderState::Loading`]) until a later projection finds it populated.

use derive_more::Display;
use kbsync_cache::FolderCache;
use kbsync_remote::{Resource, ResourceId};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;

/// Where the projector reads folder listings from.
pub trait ChildLookup {
    /// Cached children of `folder`, or `None` if it has not been fetched.
    fn children(&self, folder: &ResourceId) -> Option<Arc<[Resource]>>;
}

impl ChildLookup for FolderCache {
    fn children(&self, folder: &ResourceId) -> Option<Arc<[Resource]>> {
        FolderCache::children(self, folder)
    }
}

impl ChildLookup for HashMap<ResourceId, Arc<[Resource]>> {
    fn children(&self, folder: &ResourceId) -> Option<Arc<[Resource]>> {
        self.get(folder).cloned()
    }
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SortKey {
    #[default]
    #[display("name")]
    Name,
    #[display("modified")]
    Modified,
    #[display("size")]
    Size,
}
impl FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "name" => Ok(Self::Name),
            "modified" | "date" => Ok(Self::Modified),
            "size" => Ok(Self::Size),
            other => Err(format!("unknown sort key '{other}' (expected name, modified or size)")),
        }
    }
}

/// Sort order applied independently at every level of the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Sort {
    pub key: SortKey,
    pub descending: bool,
}
impl Sort {
    pub fn new(key: SortKey, descending: bool) -> Self {
        Self { key, descending }
    }

    /// Total order between two siblings.
    ///
    /// Ties on the primary key fall back to the case-insensitive name, which
    /// is always ascending. Sorting by size keeps directories (which have no
    /// size) ahead of files in both directions.
    pub fn compare(&self, a: &Resource, b: &Resource) -> Ordering {
        let primary = match self.key {
            SortKey::Name => compare_names(a.name(), b.name()),
            SortKey::Modified => a.modified_at.cmp(&b.modified_at),
            SortKey::Size => {
                let kind = b.is_dir().cmp(&a.is_dir());
                if kind != Ordering::Equal {
                    return kind.then_with(|| compare_names(a.name(), b.name()));
                }
                a.size_bytes.cmp(&b.size_bytes)
            },
        };
        let primary = if self.descending { primary.reverse() } else { primary };
        primary.then_with(|| compare_names(a.name(), b.name()))
    }

    fn sorted(&self, children: &[Resource]) -> Vec<Resource> {
        let mut sorted = children.to_vec();
        sorted.sort_by(|a, b| self.compare(a, b));
        sorted
    }
}

fn compare_names(a: &str, b: &str) -> Ordering {
    a.chars().flat_map(char::to_lowercase).cmp(b.chars().flat_map(char::to_lowercase))
}

/// Display state of a folder row.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FolderState {
    #[display("collapsed")]
    Collapsed,
    /// Expanded, but the listing has not arrived yet.
    #[display("loading")]
    Loading,
    /// Expanded and the listing is known to be empty.
    #[display("empty")]
    Empty,
    #[display("expanded")]
    Expanded,
}

/// One visible line of the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeRow {
    pub resource: Resource,
    pub depth: usize,
    pub parent_id: Option<ResourceId>,
    pub is_expanded: bool,
    /// `None` for files.
    pub folder_state: Option<FolderState>,
}

/// Folder ids the user currently has open.
///
/// Collapsing only removes the id here; cached listings stay untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpansionSet {
    expanded: HashSet<ResourceId>,
}
impl ExpansionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip the folder's state. Returns `true` if it is now expanded.
    pub fn toggle(&mut self, id: &ResourceId) -> bool {
        if self.expanded.remove(id) {
            false
        } else {
            self.expanded.insert(id.clone());
            true
        }
    }

    pub fn expand(&mut self, id: &ResourceId) -> bool {
        self.expanded.insert(id.clone())
    }

    pub fn collapse(&mut self, id: &ResourceId) -> bool {
        self.expanded.remove(id)
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.expanded.contains(id)
    }

    pub fn clear(&mut self) {
        self.expanded.clear();
    }

    pub fn len(&self) -> usize {
        self.expanded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.expanded.is_empty()
    }
}
impl<I: Into<ResourceId>> FromIterator<I> for ExpansionSet {
    fn from_iter<T: IntoIterator<Item = I>>(iter: T) -> Self {
        Self { expanded: iter.into_iter().map(Into::into).collect() }
    }
}

struct Pending {
    resource: Resource,
    depth: usize,
    parent_id: Option<ResourceId>,
}

/// Flatten the visible part of the tree into rows.
///
/// Depth-first, pre-order: every row is followed by its visible descendants,
/// siblings appear in `sort` order. Uses an explicit stack, so deep trees
/// cannot overflow the call stack. A folder id is descended into at most
/// once per projection, which stops a remote that reports a cycle.
///
/// # Examples
///
/// ```
/// use kbsync_engine::tree::{ExpansionSet, Sort, project};
/// use kbsync_remote::{Resource, ResourceId};
/// use std::collections::HashMap;
/// use std::sync::Arc;
/// use time::OffsetDateTime;
///
/// let root = vec![Resource::directory("docs", "docs", OffsetDateTime::UNIX_EPOCH)];
/// let mut cache: HashMap<ResourceId, Arc<[Resource]>> = HashMap::new();
/// cache.insert("docs".into(), vec![Resource::file("docs/a.txt", "docs/a.txt", OffsetDateTime::UNIX_EPOCH)].into());
///
/// let collapsed = project(&root, &cache, &ExpansionSet::new(), Sort::default());
/// assert_eq!(collapsed.len(), 1);
///
/// let expanded = project(&root, &cache, &ExpansionSet::from_iter(["docs"]), Sort::default());
/// assert_eq!(expanded[1].depth, 1);
/// ```
pub fn project(root: &[Resource], lookup: &impl ChildLookup, expanded: &ExpansionSet, sort: Sort) -> Vec<TreeRow> {
    let mut rows = Vec::with_capacity(root.len());
    let mut descended: HashSet<ResourceId> = HashSet::new();
    let mut stack: Vec<Pending> = sort
        .sorted(root)
        .into_iter()
        .rev()
        .map(|resource| Pending { resource, depth: 0, parent_id: None })
        .collect();

    while let Some(Pending { resource, depth, parent_id }) = stack.pop() {
        if !resource.is_dir() {
            rows.push(TreeRow { resource, depth, parent_id, is_expanded: false, folder_state: None });
            continue;
        }
        let is_expanded = expanded.contains(&resource.id);
        let children = is_expanded.then(|| lookup.children(&resource.id)).flatten();
        let folder_state = match (is_expanded, &children) {
            (false, _) => FolderState::Collapsed,
            (true, None) => FolderState::Loading,
            (true, Some(children)) if children.is_empty() => FolderState::Empty,
            (true, Some(_)) => FolderState::Expanded,
        };
        if let Some(children) = children {
            if descended.insert(resource.id.clone()) {
                stack.extend(sort.sorted(&children).into_iter().rev().map(|child| Pending {
                    resource: child,
                    depth: depth + 1,
                    parent_id: Some(resource.id.clone()),
                }));
            } else {
                tracing::warn!(folder = %resource.id, "Folder appears more than once in the tree; not descending again");
            }
        }
        rows.push(TreeRow { resource, depth, parent_id, is_expanded, folder_state: Some(folder_state) });
    }
    rows
}
