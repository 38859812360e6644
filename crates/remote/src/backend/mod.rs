//! Remote client trait and implementations.
//!
//! This module defines the [`RemoteClient`] trait, the contract between the
//! cache/selection/indexing engine and whatever actually talks to the remote
//! store (a cloud drive API, a directory on disk, an in-memory fixture).

mod local;
#[cfg(feature = "mock")]
mod mock;
mod ro;

pub use self::local::LocalRemote;
#[cfg(feature = "mock")]
pub use self::mock::MockRemote;
pub use self::ro::ReadOnlyRemote;
use crate::error::Result;
use crate::models::{JobId, RemoteStatus, Resource, ResourceId};
use async_trait::async_trait;
use std::collections::HashMap;

/// Unified interface for remote resource stores.
///
/// One client instance is one connection: resource ids are only unique
/// within it. Every call is a single round-trip; no retry happens at this
/// layer, callers decide what is worth retrying via
/// [`ErrorKind::is_retryable`](crate::error::ErrorKind::is_retryable).
///
/// # Examples
///
/// ```
/// use kbsync_remote::{JobId, RemoteClient, ResourceId, error::Result};
///
/// async fn add_to_job(remote: &dyn RemoteClient, job: &JobId, id: ResourceId) -> Result<()> {
///     let mut members = remote.job_membership(job).await?;
///     if !members.contains(&id) {
///         members.push(id);
///         remote.set_job_membership(job, &members).await?;
///         remote.trigger_sync(job).await?;
///     }
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Connection identifier (taken from the configuration). Only used for
    /// logging, uniqueness is not enforced.
    fn connection(&self) -> &str;

    /// List the direct children of a folder, or of the root when `folder`
    /// is `None`.
    ///
    /// The listing is a single page: implementations talking to a paginated
    /// API must drain every page before returning, callers never merge
    /// partial results.
    async fn list_children(&self, folder: Option<&ResourceId>) -> Result<Vec<Resource>>;

    /// Current membership of a job, in the order the remote reports it.
    async fn job_membership(&self, job: &JobId) -> Result<Vec<ResourceId>>;

    /// Replace the membership of a job.
    ///
    /// Full-replacement semantics: `members` is the complete new set, not a
    /// delta.
    async fn set_job_membership(&self, job: &JobId, members: &[ResourceId]) -> Result<()>;

    /// Ask the remote to (re-)index the job. Returns as soon as the request
    /// is accepted; progress is observed through
    /// [`resource_statuses()`](Self::resource_statuses).
    async fn trigger_sync(&self, job: &JobId) -> Result<()>;

    /// Best-effort status annotations for resources in a job.
    ///
    /// Ids missing from the returned map are "not found in the job", which is
    /// not an error.
    async fn resource_statuses(&self, job: &JobId, ids: &[ResourceId]) -> Result<HashMap<ResourceId, RemoteStatus>>;
}
