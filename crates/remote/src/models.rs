//! Remote models.
//!
//! These types are immutable snapshots of what the remote store reported. A
//! resource that changed remotely is a new snapshot, never an in-place edit.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use time::OffsetDateTime;

/// Opaque resource identifier, unique within one connection.
#[derive(Debug, Display, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);
impl From<String> for ResourceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}
impl From<&str> for ResourceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}
impl ResourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
impl AsRef<str> for ResourceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
impl Borrow<str> for ResourceId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Identifier of a remote indexing job (a "knowledge base").
#[derive(Debug, Display, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);
impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}
impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}
impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    #[display("file")]
    File,
    #[display("directory")]
    Directory,
}

/// Indexing status as reported by the remote store.
///
/// This is the remote's vocabulary only; local optimistic states such as
/// "de-indexing" or "timeout" never come from the remote.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteStatus {
    #[display("unindexed")]
    Unindexed,
    #[display("pending")]
    Pending,
    #[display("processing")]
    Processing,
    #[display("indexed")]
    Indexed,
    #[display("error")]
    Error,
}

/// One file or directory record from the remote store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub id: ResourceId,
    /// Slash-delimited path; the display name is the last segment.
    pub path: String,
    pub kind: ResourceKind,
    pub modified_at: OffsetDateTime,
    /// Only ever populated for files.
    pub size_bytes: Option<u64>,
    pub mime_type: Option<String>,
    /// Optional hint from the store, not authoritative for job membership.
    pub remote_status: Option<RemoteStatus>,
}
impl Resource {
    pub fn new(id: impl Into<ResourceId>, path: impl Into<String>, kind: ResourceKind, modified_at: OffsetDateTime) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            kind,
            modified_at,
            size_bytes: None,
            mime_type: None,
            remote_status: None,
        }
    }

    pub fn file(id: impl Into<ResourceId>, path: impl Into<String>, modified_at: OffsetDateTime) -> Self {
        Self::new(id, path, ResourceKind::File, modified_at)
    }

    pub fn directory(id: impl Into<ResourceId>, path: impl Into<String>, modified_at: OffsetDateTime) -> Self {
        Self::new(id, path, ResourceKind::Directory, modified_at)
    }

    /// Directories never carry a size, whatever the store claims.
    pub fn with_size(mut self, size_bytes: u64) -> Self {
        self.size_bytes = match self.kind {
            ResourceKind::File => Some(size_bytes),
            ResourceKind::Directory => None,
        };
        self
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn with_remote_status(mut self, status: RemoteStatus) -> Self {
        self.remote_status = Some(status);
        self
    }

    pub fn is_dir(&self) -> bool {
        self.kind == ResourceKind::Directory
    }

    /// Last non-empty segment of the path, or the whole path if it has none.
    pub fn name(&self) -> &str {
        self.path.trim_end_matches('/').rsplit('/').find(|s| !s.is_empty()).unwrap_or(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("docs/report.pdf", "report.pdf")]
    #[case("/docs/archive/", "archive")]
    #[case("top.txt", "top.txt")]
    #[case("/", "/")]
    fn test_display_name(#[case] path: &str, #[case] expected: &str) {
        let resource = Resource::file("id", path, OffsetDateTime::UNIX_EPOCH);
        assert_eq!(resource.name(), expected);
    }

    #[test]
    fn test_directories_drop_size() {
        let dir = Resource::directory("d", "d", OffsetDateTime::UNIX_EPOCH).with_size(10);
        assert_eq!(dir.size_bytes, None);
        let file = Resource::file("f", "f", OffsetDateTime::UNIX_EPOCH).with_size(10);
        assert_eq!(file.size_bytes, Some(10));
    }

    #[test]
    fn test_remote_status_wire_names() {
        assert_eq!(serde_json::to_string(&RemoteStatus::Processing).unwrap(), r#""processing""#);
        let parsed: RemoteStatus = serde_json::from_str(r#""indexed""#).unwrap();
        assert_eq!(parsed, RemoteStatus::Indexed);
    }

    #[test]
    fn test_ids_are_transparent() {
        let id = ResourceId::from("docs/a.txt");
        assert_eq!(serde_json::to_string(&id).unwrap(), r#""docs/a.txt""#);
        assert_eq!(id.to_string(), "docs/a.txt");
    }
}
