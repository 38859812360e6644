//! Browsing, selecting and indexing remote resources.
//!
//! The engine sits between a [`RemoteClient`](kbsync_remote::RemoteClient)
//! and whatever presents the tree to the user:
//!
//! - [`tree`] flattens cached folders into display rows,
//! - [`selection`] tracks which files the user picked,
//! - [`reconcile`] moves picked files in and out of a job and keeps their
//!   statuses current.
//!
//! [`Session`] ties one connection and one job together. All state is owned
//! by the session; switching connection or job means closing it and opening
//! another.

pub mod error;
pub mod reconcile;
pub mod selection;
mod session;
pub mod tree;

pub use crate::reconcile::{BatchId, BatchOutcome, IndexStatus, ReconcileEvent, Reconciler};
pub use crate::selection::{FolderToggle, Selection};
pub use crate::session::Session;
pub use crate::tree::{ExpansionSet, FolderState, Sort, SortKey, TreeRow};
