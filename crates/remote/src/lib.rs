//! Remote resource store contract.
//!
//! A remote store exposes a hierarchical tree of [`Resource`]s through a
//! "list children" call, plus the membership set of an indexing job. The
//! [`RemoteClient`] trait is the only seam the rest of the workspace talks
//! to; [`backend`] holds the concrete implementations.

pub mod backend;
pub mod error;
mod id;
mod models;

pub use crate::backend::RemoteClient;
pub use crate::id::validate as validate_id;
pub use crate::models::{JobId, RemoteStatus, Resource, ResourceId, ResourceKind};
use std::sync::Arc;

pub type RemoteHandle = Arc<dyn RemoteClient + Send + Sync>;
