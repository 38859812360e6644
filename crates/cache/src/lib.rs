//! In-memory folder cache for one remote connection.
//!
//! The cache maps a folder to the complete child listing the remote returned
//! the last time it was asked. It is not a source of truth: discarding it
//! only costs round-trips, which is exactly what happens when the user
//! switches connection or job.
//!
//! # Invariants
//! - A folder's listing is either absent (never fetched, or the last fetch
//!   failed) or complete. Pages are never merged.
//! - At most one listing request per folder is outstanding at any time;
//!   concurrent callers share its outcome, success or failure.
//! - Collapsing a folder in the UI never evicts anything. Only
//!   [`FolderCache::clear`] and [`FolderCache::refresh`] change existing
//!   entries.

pub mod error;
mod models;
mod store;

pub use crate::models::{FolderEntry, FolderKey};
pub use crate::store::FolderCache;
