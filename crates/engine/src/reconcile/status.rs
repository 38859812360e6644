use derive_more::Display;
use kbsync_remote::{RemoteStatus, ResourceId};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Local indexing status of one resource.
///
/// A superset of [`RemoteStatus`]: `DeIndexing` and `Timeout` only ever
/// originate locally.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IndexStatus {
    #[default]
    #[display("unindexed")]
    Unindexed,
    #[display("pending")]
    Pending,
    #[display("processing")]
    Processing,
    #[display("indexed")]
    Indexed,
    #[display("de-indexing")]
    DeIndexing,
    #[display("error")]
    Error,
    #[display("timeout")]
    Timeout,
}
impl IndexStatus {
    /// The remote will not move this status on its own.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Indexed | Self::Error | Self::Timeout)
    }

    /// Waiting on the remote to finish indexing.
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }
}
impl From<RemoteStatus> for IndexStatus {
    fn from(status: RemoteStatus) -> Self {
        match status {
            RemoteStatus::Unindexed => Self::Unindexed,
            RemoteStatus::Pending => Self::Pending,
            RemoteStatus::Processing => Self::Processing,
            RemoteStatus::Indexed => Self::Indexed,
            RemoteStatus::Error => Self::Error,
        }
    }
}

/// Identifies one `request_index` call and the poll loop it started.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[display("#{_0}")]
pub struct BatchId(pub(crate) u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    /// Set by a user action in this session.
    Local,
    /// Copied from the remote by a poll or resync.
    Remote,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    status: IndexStatus,
    /// Monotonic write counter; the newest write always wins.
    revision: u64,
    changed_at: Instant,
    origin: Origin,
    /// Batch responsible for this entry until it settles.
    owner: Option<BatchId>,
}
impl Entry {
    /// Whether a periodic resync must leave this entry alone.
    ///
    /// `DeIndexing` is always shielded. An `Unindexed` the user just asked
    /// for is shielded until `window` has passed, since the remote may still
    /// report the removed resource for a while.
    fn is_protected(&self, now: Instant, window: Duration) -> bool {
        match self.status {
            IndexStatus::DeIndexing => true,
            IndexStatus::Unindexed => self.origin == Origin::Local && now.duration_since(self.changed_at) < window,
            _ => false,
        }
    }
}

/// Tallies for a finished batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub indexed: usize,
    pub errored: usize,
    pub timed_out: usize,
    /// Ids that a later action took over before the batch finished.
    pub superseded: usize,
}

/// Every status this session knows about.
///
/// Writers go through one of the `apply_*`/`set_local` methods, each of
/// which decides on its own whether the write may land. Reads of unknown ids
/// report [`IndexStatus::Unindexed`].
#[derive(Debug)]
pub(crate) struct StatusMap {
    entries: HashMap<ResourceId, Entry>,
    revision: u64,
    protect_window: Duration,
}

impl StatusMap {
    pub(crate) fn new(protect_window: Duration) -> Self {
        Self { entries: HashMap::new(), revision: 0, protect_window }
    }

    pub(crate) fn get(&self, id: &ResourceId) -> IndexStatus {
        self.entries.get(id).map(|entry| entry.status).unwrap_or_default()
    }

    pub(crate) fn owner(&self, id: &ResourceId) -> Option<BatchId> {
        self.entries.get(id).and_then(|entry| entry.owner)
    }

    pub(crate) fn ids(&self) -> impl Iterator<Item = &ResourceId> {
        self.entries.keys()
    }

    pub(crate) fn snapshot(&self) -> HashMap<ResourceId, IndexStatus> {
        self.entries.iter().map(|(id, entry)| (id.clone(), entry.status)).collect()
    }

    fn write(&mut self, id: &ResourceId, status: IndexStatus, origin: Origin, owner: Option<BatchId>) {
        self.revision += 1;
        let entry = Entry { status, revision: self.revision, changed_at: Instant::now(), origin, owner };
        self.entries.insert(id.clone(), entry);
    }

    /// Record a user-initiated status. Always lands, and takes the id away
    /// from whatever batch owned it before.
    pub(crate) fn set_local(&mut self, id: &ResourceId, status: IndexStatus, owner: Option<BatchId>) {
        self.write(id, status, Origin::Local, owner);
    }

    /// Like [`set_local`](Self::set_local), but only if the entry still has
    /// the status `expected`. Returns whether it landed.
    pub(crate) fn replace_local(&mut self, id: &ResourceId, expected: IndexStatus, status: IndexStatus) -> bool {
        if self.get(id) != expected {
            return false;
        }
        self.write(id, status, Origin::Local, None);
        true
    }

    /// Apply a poll result for `batch`. Ignored unless the batch still owns
    /// the id and is still waiting on it. A remote `unindexed` while waiting
    /// means the sync has not picked the id up yet, so it is ignored too.
    pub(crate) fn apply_poll(&mut self, id: &ResourceId, batch: BatchId, status: IndexStatus) -> bool {
        let Some(entry) = self.entries.get(id) else {
            return false;
        };
        if entry.owner != Some(batch) || !entry.status.is_in_flight() || status == IndexStatus::Unindexed {
            return false;
        }
        if entry.status == status {
            return false;
        }
        self.write(id, status, Origin::Remote, Some(batch));
        true
    }

    /// Apply a periodic resync result. Returns whether the entry changed.
    ///
    /// Protected entries are skipped. An id a batch is still waiting on is
    /// not knocked back to `unindexed`, since membership writes and sync
    /// pickup race with the resync; the batch's own poll loop settles it.
    pub(crate) fn apply_resync(&mut self, id: &ResourceId, status: IndexStatus, now: Instant) -> bool {
        let current = self.entries.get(id).copied();
        if let Some(entry) = current {
            if entry.is_protected(now, self.protect_window) {
                return false;
            }
            if entry.owner.is_some() && entry.status.is_in_flight() && status == IndexStatus::Unindexed {
                return false;
            }
            if entry.status == status {
                return false;
            }
        } else if status == IndexStatus::Unindexed {
            // Absent already reads as unindexed.
            return false;
        }
        self.write(id, status, Origin::Remote, current.and_then(|entry| entry.owner));
        true
    }

    /// Ids `batch` is still waiting on, in the order given.
    pub(crate) fn waiting_on(&self, batch: BatchId, ids: &[ResourceId]) -> Vec<ResourceId> {
        ids.iter()
            .filter(|id| {
                self.entries
                    .get(*id)
                    .is_some_and(|entry| entry.owner == Some(batch) && entry.status.is_in_flight())
            })
            .cloned()
            .collect()
    }

    /// Close out `batch`: anything it is still waiting on times out, and it
    /// gives up ownership of every id.
    pub(crate) fn settle(&mut self, batch: BatchId, ids: &[ResourceId]) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for id in ids {
            let Some(entry) = self.entries.get(id).copied() else {
                outcome.superseded += 1;
                continue;
            };
            if entry.owner != Some(batch) {
                outcome.superseded += 1;
                continue;
            }
            match entry.status {
                IndexStatus::Indexed => outcome.indexed += 1,
                IndexStatus::Error => outcome.errored += 1,
                status if status.is_in_flight() => {
                    self.write(id, IndexStatus::Timeout, Origin::Local, None);
                    outcome.timed_out += 1;
                    continue;
                },
                _ => outcome.superseded += 1,
            }
            if let Some(entry) = self.entries.get_mut(id) {
                entry.owner = None;
            }
        }
        outcome
    }

    #[cfg(test)]
    pub(crate) fn revision(&self, id: &ResourceId) -> Option<u64> {
        self.entries.get(id).map(|entry| entry.revision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const WINDOW: Duration = Duration::from_secs(30);

    fn id(id: &str) -> ResourceId {
        ResourceId::from(id)
    }

    #[rstest]
    #[case(IndexStatus::Unindexed, false)]
    #[case(IndexStatus::Pending, false)]
    #[case(IndexStatus::Processing, false)]
    #[case(IndexStatus::Indexed, true)]
    #[case(IndexStatus::DeIndexing, false)]
    #[case(IndexStatus::Error, true)]
    #[case(IndexStatus::Timeout, true)]
    fn test_terminal_statuses(#[case] status: IndexStatus, #[case] terminal: bool) {
        assert_eq!(status.is_terminal(), terminal);
    }

    #[test]
    fn test_unknown_ids_read_as_unindexed() {
        let map = StatusMap::new(WINDOW);
        assert_eq!(map.get(&id("nope")), IndexStatus::Unindexed);
        assert_eq!(IndexStatus::DeIndexing.to_string(), "de-indexing");
    }

    #[tokio::test(start_paused = true)]
    async fn test_de_indexing_is_always_protected() {
        let mut map = StatusMap::new(WINDOW);
        map.set_local(&id("a"), IndexStatus::DeIndexing, None);
        tokio::time::advance(WINDOW * 10).await;
        assert!(!map.apply_resync(&id("a"), IndexStatus::Indexed, Instant::now()));
        assert_eq!(map.get(&id("a")), IndexStatus::DeIndexing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_unindexed_is_protected_within_window() {
        let mut map = StatusMap::new(WINDOW);
        map.set_local(&id("a"), IndexStatus::Unindexed, None);
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(!map.apply_resync(&id("a"), IndexStatus::Indexed, Instant::now()));
        tokio::time::advance(WINDOW).await;
        assert!(map.apply_resync(&id("a"), IndexStatus::Indexed, Instant::now()));
        assert_eq!(map.get(&id("a")), IndexStatus::Indexed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resync_overwrites_unprotected_entries() {
        let mut map = StatusMap::new(WINDOW);
        map.set_local(&id("a"), IndexStatus::Error, None);
        map.set_local(&id("b"), IndexStatus::Timeout, None);
        assert!(map.apply_resync(&id("a"), IndexStatus::Indexed, Instant::now()));
        assert!(map.apply_resync(&id("b"), IndexStatus::Unindexed, Instant::now()));
        assert_eq!(map.get(&id("a")), IndexStatus::Indexed);
        assert_eq!(map.get(&id("b")), IndexStatus::Unindexed);
        // Remote-origin unindexed is not protected.
        assert!(map.apply_resync(&id("b"), IndexStatus::Pending, Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resync_does_not_drop_waiting_ids() {
        let mut map = StatusMap::new(WINDOW);
        let batch = BatchId(1);
        map.set_local(&id("a"), IndexStatus::Pending, Some(batch));
        assert!(!map.apply_resync(&id("a"), IndexStatus::Unindexed, Instant::now()));
        assert!(map.apply_resync(&id("a"), IndexStatus::Processing, Instant::now()));
        assert_eq!(map.owner(&id("a")), Some(batch));
        assert_eq!(map.waiting_on(batch, &[id("a")]), [id("a")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_results_only_land_for_owner() {
        let mut map = StatusMap::new(WINDOW);
        let (old, new) = (BatchId(1), BatchId(2));
        map.set_local(&id("a"), IndexStatus::Pending, Some(old));
        map.set_local(&id("a"), IndexStatus::Pending, Some(new));
        assert!(!map.apply_poll(&id("a"), old, IndexStatus::Error));
        assert!(map.apply_poll(&id("a"), new, IndexStatus::Processing));
        assert!(map.apply_poll(&id("a"), new, IndexStatus::Indexed));
        assert_eq!(map.get(&id("a")), IndexStatus::Indexed);
        // Terminal entries stop accepting poll results.
        assert!(!map.apply_poll(&id("a"), new, IndexStatus::Error));
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_writes_have_higher_revisions() {
        let mut map = StatusMap::new(WINDOW);
        map.set_local(&id("a"), IndexStatus::Pending, Some(BatchId(1)));
        let first = map.revision(&id("a")).unwrap();
        map.apply_poll(&id("a"), BatchId(1), IndexStatus::Processing);
        assert!(map.revision(&id("a")).unwrap() > first);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_times_out_waiting_ids() {
        let mut map = StatusMap::new(WINDOW);
        let batch = BatchId(7);
        let ids = [id("a"), id("b"), id("c"), id("d")];
        for id in &ids {
            map.set_local(id, IndexStatus::Pending, Some(batch));
        }
        map.apply_poll(&ids[0], batch, IndexStatus::Indexed);
        map.apply_poll(&ids[1], batch, IndexStatus::Error);
        map.set_local(&ids[3], IndexStatus::DeIndexing, None);
        let outcome = map.settle(batch, &ids);
        assert_eq!(outcome, BatchOutcome { indexed: 1, errored: 1, timed_out: 1, superseded: 1 });
        assert_eq!(map.get(&ids[2]), IndexStatus::Timeout);
        assert_eq!(map.get(&ids[3]), IndexStatus::DeIndexing);
        assert!(ids.iter().all(|id| map.owner(id).is_none()));
    }
}
