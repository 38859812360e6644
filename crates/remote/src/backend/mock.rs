//! In-memory remote for testing.

use crate::error::{ErrorKind, Result};
use crate::id::validate as validate_id;
use crate::{JobId, RemoteClient, RemoteStatus, Resource, ResourceId, ResourceKind};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use time::OffsetDateTime;

type FolderKey = Option<ResourceId>;

#[derive(Default)]
struct State {
    children: HashMap<FolderKey, Vec<Resource>>,
    kinds: HashMap<ResourceId, ResourceKind>,
    members: HashMap<JobId, Vec<ResourceId>>,
    statuses: HashMap<ResourceId, RemoteStatus>,
    scripted: HashMap<ResourceId, VecDeque<Option<RemoteStatus>>>,
    failing_folders: HashSet<FolderKey>,
    fail_membership: bool,
    fail_status_calls: usize,
    list_calls: HashMap<FolderKey, usize>,
    membership_writes: usize,
    sync_triggers: usize,
    status_calls: usize,
}

/// In-memory remote for testing.
///
/// The resource tree, job memberships and status annotations live behind a
/// [`Mutex`], so every knob can be turned through `&self` while the mock is
/// shared (as a [`RemoteHandle`](crate::RemoteHandle)) with the code under
/// test. Resource ids are their canonical paths.
///
/// # Examples
///
/// ```
/// use kbsync_remote::backend::MockRemote;
/// use kbsync_remote::{RemoteClient, ResourceId};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let remote = MockRemote::with_tree(["docs/", "docs/a.txt", "readme.md"]);
/// let root = remote.list_children(None).await?;
/// assert_eq!(root.len(), 2);
///
/// let docs = remote.list_children(Some(&ResourceId::from("docs"))).await?;
/// assert_eq!(docs[0].name(), "a.txt");
/// # Ok(())
/// # }
/// ```
pub struct MockRemote {
    name: String,
    latency: Option<Duration>,
    write_latency: Option<Duration>,
    state: Mutex<State>,
}

impl MockRemote {
    /// Create a mock remote pre-populated with resources.
    ///
    /// Panics if an id fails validation or if a resource's parent directory
    /// was not listed before it. If test setup is wrong, then test should not
    /// pass.
    pub fn with_resources(resources: impl IntoIterator<Item = Resource>) -> Self {
        let remote = Self {
            name: "mock".to_string(),
            latency: None,
            write_latency: None,
            state: Mutex::new(State::default()),
        };
        for resource in resources {
            remote.upsert(resource);
        }
        remote
    }

    /// Shorthand for [`with_resources`](Self::with_resources): entries ending
    /// in `/` are directories, everything else is a file whose size is the
    /// length of its path.
    pub fn with_tree<'a>(paths: impl IntoIterator<Item = &'a str>) -> Self {
        Self::with_resources(paths.into_iter().map(|path| {
            let Ok(id) = validate_id(path) else {
                panic!("MockRemote::with_tree: invalid path {path}");
            };
            match path.ends_with('/') {
                true => Resource::directory(id.clone(), id.as_str(), OffsetDateTime::UNIX_EPOCH),
                false => Resource::file(id.clone(), id.as_str(), OffsetDateTime::UNIX_EPOCH).with_size(path.len() as u64),
            }
        }))
    }

    /// Change the connection name of the mock remote.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Delay every folder listing, so concurrent callers actually overlap.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Delay every membership update, so other calls can run while one is
    /// outstanding.
    pub fn with_write_latency(mut self, latency: Duration) -> Self {
        self.write_latency = Some(latency);
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A panicking test thread must not cascade into every other assertion.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a resource, or replace the snapshot with the same id.
    pub fn upsert(&self, resource: Resource) {
        let Ok(id) = validate_id(resource.id.as_str()) else {
            panic!("MockRemote::upsert: invalid id {}", resource.id);
        };
        let parent: FolderKey = id.as_str().rsplit_once('/').map(|(parent, _)| ResourceId::from(parent));
        let mut state = self.state();
        if let Some(parent) = &parent
            && state.kinds.get(parent) != Some(&ResourceKind::Directory)
        {
            panic!("MockRemote::upsert: parent directory {parent} of {id} does not exist");
        }
        state.kinds.insert(id.clone(), resource.kind);
        if resource.is_dir() {
            state.children.entry(Some(id.clone())).or_default();
        }
        let siblings = state.children.entry(parent).or_default();
        match siblings.iter_mut().find(|r| r.id == id) {
            Some(existing) => *existing = resource,
            None => siblings.push(resource),
        }
    }

    pub fn set_members<'a>(&self, job: &JobId, members: impl IntoIterator<Item = &'a str>) {
        self.state().members.insert(job.clone(), members.into_iter().map(ResourceId::from).collect());
    }

    pub fn members(&self, job: &JobId) -> Vec<ResourceId> {
        self.state().members.get(job).cloned().unwrap_or_default()
    }

    /// Fixed status annotation, reported on every call.
    pub fn set_status(&self, id: &str, status: RemoteStatus) {
        self.state().statuses.insert(ResourceId::from(id), status);
    }

    /// Status annotations consumed one per status call that asks about `id`.
    /// The last entry sticks once the script runs out; `None` means the id is
    /// absent from the response.
    pub fn script_status(&self, id: &str, script: impl IntoIterator<Item = Option<RemoteStatus>>) {
        self.state().scripted.insert(ResourceId::from(id), script.into_iter().collect());
    }

    pub fn fail_listing(&self, folder: Option<&str>, failing: bool) {
        let key = folder.map(ResourceId::from);
        let mut state = self.state();
        match failing {
            true => state.failing_folders.insert(key),
            false => state.failing_folders.remove(&key),
        };
    }

    pub fn fail_membership(&self, failing: bool) {
        self.state().fail_membership = failing;
    }

    /// Make the next `calls` status requests fail with a network error.
    pub fn fail_status_calls(&self, calls: usize) {
        self.state().fail_status_calls = calls;
    }

    pub fn list_calls(&self, folder: Option<&str>) -> usize {
        self.state().list_calls.get(&folder.map(ResourceId::from)).copied().unwrap_or(0)
    }

    pub fn total_list_calls(&self) -> usize {
        self.state().list_calls.values().sum()
    }

    pub fn membership_writes(&self) -> usize {
        self.state().membership_writes
    }

    pub fn sync_triggers(&self) -> usize {
        self.state().sync_triggers
    }

    pub fn status_calls(&self) -> usize {
        self.state().status_calls
    }
}
impl Default for MockRemote {
    fn default() -> Self {
        Self::with_resources([])
    }
}

#[async_trait]
impl RemoteClient for MockRemote {
    fn connection(&self) -> &str {
        &self.name
    }

    async fn list_children(&self, folder: Option<&ResourceId>) -> Result<Vec<Resource>> {
        let key = folder.cloned();
        *self.state().list_calls.entry(key.clone()).or_default() += 1;
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        // Never hold the lock across the await above.
        let state = self.state();
        if state.failing_folders.contains(&key) {
            exn::bail!(ErrorKind::Network(format!("listing {} failed", folder.map_or("<root>", ResourceId::as_str))));
        }
        if let Some(id) = folder {
            match state.kinds.get(id) {
                None => exn::bail!(ErrorKind::NotFound(id.to_string())),
                Some(ResourceKind::File) => exn::bail!(ErrorKind::NotADirectory(id.to_string())),
                Some(ResourceKind::Directory) => {},
            }
        }
        Ok(state.children.get(&key).cloned().unwrap_or_default())
    }

    async fn job_membership(&self, job: &JobId) -> Result<Vec<ResourceId>> {
        let state = self.state();
        if state.fail_membership {
            exn::bail!(ErrorKind::Network(format!("membership of {job} unavailable")));
        }
        Ok(state.members.get(job).cloned().unwrap_or_default())
    }

    async fn set_job_membership(&self, job: &JobId, members: &[ResourceId]) -> Result<()> {
        if let Some(latency) = self.write_latency {
            tokio::time::sleep(latency).await;
        }
        let mut state = self.state();
        if state.fail_membership {
            exn::bail!(ErrorKind::Network(format!("membership of {job} rejected")));
        }
        state.membership_writes += 1;
        state.members.insert(job.clone(), members.to_vec());
        Ok(())
    }

    async fn trigger_sync(&self, job: &JobId) -> Result<()> {
        let mut state = self.state();
        if state.fail_membership {
            exn::bail!(ErrorKind::Network(format!("sync of {job} rejected")));
        }
        state.sync_triggers += 1;
        Ok(())
    }

    async fn resource_statuses(&self, job: &JobId, ids: &[ResourceId]) -> Result<HashMap<ResourceId, RemoteStatus>> {
        let mut state = self.state();
        state.status_calls += 1;
        if state.fail_status_calls > 0 {
            state.fail_status_calls -= 1;
            exn::bail!(ErrorKind::Network(format!("status of {job} unavailable")));
        }
        let mut statuses = HashMap::new();
        for id in ids {
            let scripted = state.scripted.get_mut(id).and_then(|script| match script.len() {
                0 => None,
                1 => script.front().copied(),
                _ => script.pop_front(),
            });
            let status = match scripted {
                Some(status) => status,
                None => state.statuses.get(id).copied(),
            };
            if let Some(status) = status {
                statuses.insert(id.clone(), status);
            }
        }
        Ok(statuses)
    }
}
