//! Path-shaped identifier validation.
//!
//! Backends that derive resource ids from paths (the local backend, the mock)
//! run every incoming id through [`validate`] so an id can never name
//! something outside the store root.

use std::path::{Component, Path, PathBuf};

use crate::ResourceId;
use crate::error::{ErrorKind, Result};

/// Validates a path-shaped resource id and returns its canonical form.
///
/// The canonical form uses `/` separators, no leading or trailing slash, no
/// `.` segments and no `..` segments (they are resolved, and rejected if they
/// would leave the root). Null bytes are rejected.
///
/// # Examples
///
/// ```
/// use kbsync_remote::validate_id;
/// // Valid ids
/// assert!(validate_id("docs/report.pdf").is_ok());
/// assert!(validate_id("a/../file.txt").is_ok()); // (never leaves the root)
/// // Invalid ids
/// assert!(validate_id("../etc/passwd").is_err());
/// assert!(validate_id("a\0b").is_err());
/// // Ids get resolved
/// assert_eq!(validate_id("/wrong/../docs//./a.txt/").unwrap().as_str(), "docs/a.txt");
/// ```
pub fn validate(id: impl AsRef<str>) -> Result<ResourceId> {
    let raw = id.as_ref();
    let invalid = || ErrorKind::InvalidId(raw.to_string());
    let mut segments: Vec<&str> = Vec::new();
    for component in Path::new(raw).components() {
        match component {
            Component::Normal(s) => {
                let Some(segment) = s.to_str() else { exn::bail!(invalid()) };
                // Null bytes pass through Path::components() on Unix but cause
                // truncation in C-based syscalls.
                if segment.contains('\0') {
                    exn::bail!(invalid());
                }
                segments.push(segment);
            },
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => exn::bail!(invalid()),
            Component::ParentDir => {
                if segments.pop().is_none() {
                    exn::bail!(invalid());
                }
            },
        }
    }
    match segments.is_empty() {
        true => exn::bail!(invalid()),
        false => Ok(ResourceId::new(segments.join("/"))),
    }
}

/// Joins a validated id onto a filesystem root.
pub(crate) fn to_path(root: &Path, id: &ResourceId) -> PathBuf {
    id.as_str().split('/').fold(root.to_path_buf(), |path, segment| path.join(segment))
}
