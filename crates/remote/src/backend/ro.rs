//! Read-only remote decorator.
//!
//! Wraps another client and prevents membership changes from reaching the
//! remote, while still reporting success to the caller.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::Result;
use crate::{JobId, RemoteClient, RemoteHandle, RemoteStatus, Resource, ResourceId};

/// Read-only remote client.
///
/// Browsing and status queries are forwarded untouched; membership writes
/// and sync triggers are dropped, logging an [`info event`](tracing::Event).
#[derive(Clone)]
pub struct ReadOnlyRemote {
    inner: RemoteHandle,
}
impl ReadOnlyRemote {
    pub fn new(inner: RemoteHandle) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl RemoteClient for ReadOnlyRemote {
    fn connection(&self) -> &str {
        self.inner.connection()
    }

    async fn list_children(&self, folder: Option<&ResourceId>) -> Result<Vec<Resource>> {
        self.inner.list_children(folder).await
    }

    async fn job_membership(&self, job: &JobId) -> Result<Vec<ResourceId>> {
        self.inner.job_membership(job).await
    }

    async fn set_job_membership(&self, job: &JobId, members: &[ResourceId]) -> Result<()> {
        tracing::info!(%job, members = members.len(), "Skipping membership update during read-only mode");
        Ok(())
    }

    async fn trigger_sync(&self, job: &JobId) -> Result<()> {
        tracing::info!(%job, "Skipping sync trigger during read-only mode");
        Ok(())
    }

    async fn resource_statuses(&self, job: &JobId, ids: &[ResourceId]) -> Result<HashMap<ResourceId, RemoteStatus>> {
        self.inner.resource_statuses(job, ids).await
    }
}
