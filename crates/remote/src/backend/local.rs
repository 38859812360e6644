//! Local filesystem remote.
//!
//! Serves a directory on the local filesystem as if it were a remote store.
//! Resource ids are canonical relative paths. Job membership is persisted as
//! one JSON document per job in a separate state directory, and a sync is
//! "instant": every member present at [`trigger_sync`](RemoteClient::trigger_sync)
//! time is reported as indexed from then on.

use crate::error::{ErrorKind, Result};
use crate::id::{to_path, validate as validate_id};
use crate::{JobId, RemoteClient, RemoteStatus, Resource, ResourceId, ResourceKind};
use async_trait::async_trait;
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::{Metadata, create_dir_all as sync_create_dir};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tokio::fs;
use tokio::sync::Mutex;

/// Persisted state of one job.
#[derive(Debug, Default, Serialize, Deserialize)]
struct JobState {
    members: Vec<ResourceId>,
    #[serde(default)]
    synced: Vec<ResourceId>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    synced_at: Option<OffsetDateTime>,
}

/// Local filesystem remote.
///
/// # Examples
///
/// ```no_run
/// use kbsync_remote::backend::LocalRemote;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let remote = LocalRemote::new("nas", "/srv/documents", "/var/lib/kbsync")?;
/// # Ok(())
/// # }
/// ```
pub struct LocalRemote {
    name: String,
    /// Directory exposed as the store
    root: PathBuf,
    /// Directory holding one `<job>.json` per job
    state_dir: PathBuf,
    /// Serialises read-modify-write cycles on job state files.
    job_lock: Mutex<()>,
}
impl LocalRemote {
    /// Create a new local remote.
    ///
    /// # Errors
    ///
    /// Returns an error if `root` is not an absolute path to an existing
    /// directory, or if `state_dir` cannot be created.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>, state_dir: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let state_dir = state_dir.as_ref().to_path_buf();
        if !root.is_absolute() {
            exn::bail!(ErrorKind::InvalidId(root.display().to_string()));
        }
        if !root.is_dir() {
            exn::bail!(ErrorKind::NotFound(root.display().to_string()));
        }
        // Use non-async here; it only happens once per session and it's not
        // worth making the constructor async.
        sync_create_dir(&state_dir).map_err(|e| Self::map_io_error(e, &state_dir.display().to_string()))?;
        Ok(Self { name: name.into(), root, state_dir, job_lock: Mutex::new(()) })
    }

    fn map_io_error(e: std::io::Error, what: &str) -> ErrorKind {
        match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound(what.to_string()),
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied(what.to_string()),
            _ => ErrorKind::from(e),
        }
    }

    fn job_path(&self, job: &JobId) -> Result<PathBuf> {
        let name = job.as_str();
        if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\', '\0']) {
            exn::bail!(ErrorKind::JobState(format!("unusable job id `{name}`")));
        }
        Ok(self.state_dir.join(format!("{name}.json")))
    }

    async fn load_job(&self, job: &JobId) -> Result<JobState> {
        let path = self.job_path(job)?;
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            // A job nobody has written to yet simply has no members.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(JobState::default()),
            Err(e) => exn::bail!(Self::map_io_error(e, &path.display().to_string())),
        };
        serde_json::from_slice(&bytes).or_raise(|| ErrorKind::JobState(path.display().to_string()))
    }

    async fn store_job(&self, job: &JobId, state: &JobState) -> Result<()> {
        let path = self.job_path(job)?;
        let bytes = serde_json::to_vec_pretty(state).or_raise(|| ErrorKind::JobState(path.display().to_string()))?;
        // Write-then-rename so a crash never leaves a half-written document.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, bytes).await.map_err(|e| Self::map_io_error(e, &tmp.display().to_string()))?;
        fs::rename(&tmp, &path).await.map_err(|e| Self::map_io_error(e, &path.display().to_string()))?;
        Ok(())
    }

    fn resource(id: ResourceId, metadata: &Metadata) -> Result<Resource> {
        let modified = OffsetDateTime::from(metadata.modified().map_err(ErrorKind::from)?);
        let path = id.as_str().to_string();
        let resource = match metadata.is_dir() {
            true => Resource::new(id, path, ResourceKind::Directory, modified),
            false => {
                let mime = guess_mime_type(&path);
                let resource = Resource::new(id, path, ResourceKind::File, modified).with_size(metadata.len());
                match mime {
                    Some(mime) => resource.with_mime_type(mime),
                    None => resource,
                }
            },
        };
        Ok(resource)
    }
}

/// Just enough of a MIME table for the document formats people index.
fn guess_mime_type(path: &str) -> Option<&'static str> {
    let (_, extension) = path.rsplit_once('.')?;
    let mime = match extension.to_ascii_lowercase().as_str() {
        "txt" | "log" => "text/plain",
        "md" | "markdown" => "text/markdown",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        _ => return None,
    };
    Some(mime)
}

#[async_trait]
impl RemoteClient for LocalRemote {
    fn connection(&self) -> &str {
        &self.name
    }

    async fn list_children(&self, folder: Option<&ResourceId>) -> Result<Vec<Resource>> {
        let (dir, prefix) = match folder {
            Some(id) => {
                let id = validate_id(id.as_str())?;
                (to_path(&self.root, &id), Some(id))
            },
            None => (self.root.clone(), None),
        };
        let what = prefix.as_ref().map_or_else(|| "<root>".to_string(), ResourceId::to_string);
        let metadata = fs::metadata(&dir).await.map_err(|e| Self::map_io_error(e, &what))?;
        if !metadata.is_dir() {
            exn::bail!(ErrorKind::NotADirectory(what));
        }
        let mut entries = fs::read_dir(&dir).await.map_err(|e| Self::map_io_error(e, &what))?;
        let mut children = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| Self::map_io_error(e, &what))? {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                tracing::warn!(folder = %what, name = ?file_name, "Skipping entry with a non UTF-8 name");
                continue;
            };
            let id = match &prefix {
                Some(prefix) => ResourceId::new(format!("{prefix}/{name}")),
                None => ResourceId::new(name),
            };
            let metadata = entry.metadata().await.map_err(|e| Self::map_io_error(e, id.as_str()))?;
            // Note: silently drop what is most likely a broken symlink.
            if !metadata.is_dir() && !metadata.is_file() {
                continue;
            }
            children.push(Self::resource(id, &metadata)?);
        }
        // Directory iteration order is whatever the filesystem feels like.
        children.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(children)
    }

    async fn job_membership(&self, job: &JobId) -> Result<Vec<ResourceId>> {
        Ok(self.load_job(job).await?.members)
    }

    async fn set_job_membership(&self, job: &JobId, members: &[ResourceId]) -> Result<()> {
        let _guard = self.job_lock.lock().await;
        let mut state = self.load_job(job).await?;
        state.members = members.to_vec();
        let still_member: HashSet<&ResourceId> = state.members.iter().collect();
        let synced = state.synced.iter().filter(|id| still_member.contains(id)).cloned().collect();
        state.synced = synced;
        self.store_job(job, &state).await
    }

    async fn trigger_sync(&self, job: &JobId) -> Result<()> {
        let _guard = self.job_lock.lock().await;
        let mut state = self.load_job(job).await?;
        state.synced = state.members.clone();
        state.synced_at = Some(OffsetDateTime::now_utc());
        tracing::debug!(%job, members = state.members.len(), "Local sync complete");
        self.store_job(job, &state).await
    }

    async fn resource_statuses(&self, job: &JobId, ids: &[ResourceId]) -> Result<HashMap<ResourceId, RemoteStatus>> {
        let state = self.load_job(job).await?;
        let members: HashSet<&ResourceId> = state.members.iter().collect();
        let synced: HashSet<&ResourceId> = state.synced.iter().collect();
        let statuses = ids
            .iter()
            .filter_map(|id| match (synced.contains(id), members.contains(id)) {
                (true, _) => Some((id.clone(), RemoteStatus::Indexed)),
                (false, true) => Some((id.clone(), RemoteStatus::Pending)),
                (false, false) => None,
            })
            .collect();
        Ok(statuses)
    }
}
