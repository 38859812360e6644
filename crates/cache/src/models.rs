use derive_more::Display;
use kbsync_remote::{Resource, ResourceId};
use std::sync::Arc;
use time::OffsetDateTime;

/// Cache key: the root listing or one folder.
#[derive(Debug, Display, Clone, PartialEq, Eq, Hash)]
pub enum FolderKey {
    #[display("<root>")]
    Root,
    #[display("{_0}")]
    Folder(ResourceId),
}
impl FolderKey {
    /// The folder's id as the remote expects it (`None` for the root).
    pub fn id(&self) -> Option<&ResourceId> {
        match self {
            Self::Root => None,
            Self::Folder(id) => Some(id),
        }
    }
}
impl From<ResourceId> for FolderKey {
    fn from(id: ResourceId) -> Self {
        Self::Folder(id)
    }
}
impl From<&ResourceId> for FolderKey {
    fn from(id: &ResourceId) -> Self {
        Self::Folder(id.clone())
    }
}

/// One complete listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderEntry {
    /// Children in the order the remote returned them.
    pub children: Arc<[Resource]>,
    pub fetched_at: OffsetDateTime,
}
impl FolderEntry {
    pub fn new(children: Vec<Resource>) -> Self {
        Self { children: children.into(), fetched_at: OffsetDateTime::now_utc() }
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Child directories, in listing order.
    pub fn directories(&self) -> impl Iterator<Item = &Resource> {
        self.children.iter().filter(|child| child.is_dir())
    }
}
