//! Keeping local indexing statuses in step with the remote job.
//!
//! User actions change statuses optimistically and immediately. The remote
//! then catches up through two independent mechanisms:
//!
//! - every [`Reconciler::request_index`] call starts its own poll loop that
//!   watches exactly the ids it submitted, until they are terminal or the
//!   attempt budget runs out (leaving them in [`IndexStatus::Timeout`]);
//! - a periodic [`Reconciler::resync`] copies the remote view over every
//!   known id, except ids a recent local action protects.
//!
//! Neither mechanism ever fails the session: errors are scoped to the batch
//! or tick that hit them.

pub mod error;
mod poll;
mod status;

pub use self::status::{BatchId, BatchOutcome, IndexStatus};
use crate::reconcile::error::{ErrorKind, Result};
use crate::reconcile::status::StatusMap;
use derive_more::Display;
use exn::ResultExt;
use indexmap::IndexSet;
use kbsync_asyncutils::TaskSet;
use kbsync_config::ReconcileConfig;
use kbsync_remote::error::Result as RemoteResult;
use kbsync_remote::{JobId, RemoteHandle, ResourceId};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::instrument;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    #[display("index")]
    Index,
    #[display("de-index")]
    DeIndex,
}

/// Notifications for whoever presents statuses to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileEvent {
    /// Membership was updated and a poll loop is watching `ids`.
    BatchStarted { batch: BatchId, ids: Vec<ResourceId> },
    /// One failure for the whole batch, never one per id.
    MembershipUpdateFailed { action: Action, ids: Vec<ResourceId>, reason: String },
    /// The poll loop for `batch` is done.
    BatchSettled { batch: BatchId, outcome: BatchOutcome },
    DeIndexed { ids: Vec<ResourceId> },
    Resynced { updated: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum TaskKey {
    Resync,
    Batch(BatchId),
}

/// State shared between the reconciler and its background tasks.
pub(crate) struct Shared {
    remote: RemoteHandle,
    job: JobId,
    config: ReconcileConfig,
    statuses: Mutex<StatusMap>,
    events: broadcast::Sender<ReconcileEvent>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, StatusMap> {
        self.statuses.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: ReconcileEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    async fn add_members(&self, ids: &[ResourceId]) -> RemoteResult<()> {
        let mut members: IndexSet<ResourceId> = self.remote.job_membership(&self.job).await?.into_iter().collect();
        members.extend(ids.iter().cloned());
        let members: Vec<ResourceId> = members.into_iter().collect();
        self.remote.set_job_membership(&self.job, &members).await?;
        self.remote.trigger_sync(&self.job).await
    }

    async fn remove_members(&self, ids: &[ResourceId]) -> RemoteResult<()> {
        let remove: HashSet<&ResourceId> = ids.iter().collect();
        let members: Vec<ResourceId> = self
            .remote
            .job_membership(&self.job)
            .await?
            .into_iter()
            .filter(|id| !remove.contains(id))
            .collect();
        self.remote.set_job_membership(&self.job, &members).await?;
        self.remote.trigger_sync(&self.job).await
    }

    #[instrument(level = "debug", skip(self), fields(job = %self.job))]
    async fn resync(&self) -> Result<usize> {
        let members: HashSet<ResourceId> = self
            .remote
            .job_membership(&self.job)
            .await
            .or_raise(|| ErrorKind::ResyncFailed(self.job.to_string()))?
            .into_iter()
            .collect();
        let mut known: IndexSet<ResourceId> = self.lock().ids().cloned().collect();
        known.extend(members.iter().cloned());
        let known: Vec<ResourceId> = known.into_iter().collect();
        let annotations = match known.is_empty() {
            true => HashMap::new(),
            false => self
                .remote
                .resource_statuses(&self.job, &known)
                .await
                .or_raise(|| ErrorKind::ResyncFailed(self.job.to_string()))?,
        };

        let now = Instant::now();
        let updated = {
            let mut statuses = self.lock();
            known
                .iter()
                .filter(|id| {
                    let remote = match annotations.get(*id) {
                        Some(status) => IndexStatus::from(*status),
                        None if members.contains(*id) => IndexStatus::Pending,
                        None => IndexStatus::Unindexed,
                    };
                    statuses.apply_resync(id, remote, now)
                })
                .count()
        };
        tracing::debug!(known = known.len(), updated, "Resynced statuses");
        self.emit(ReconcileEvent::Resynced { updated });
        Ok(updated)
    }
}

/// Owns the status map for one job and the tasks that reconcile it.
///
/// Dropping the reconciler cancels its poll loops and the resync timer;
/// [`shutdown`](Self::shutdown) does the same and waits for them to stop.
pub struct Reconciler {
    shared: Arc<Shared>,
    tasks: TaskSet<TaskKey>,
    next_batch: AtomicU64,
}

impl Reconciler {
    pub fn new(remote: RemoteHandle, job: JobId, config: &ReconcileConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                remote,
                job,
                statuses: Mutex::new(StatusMap::new(config.protect_window())),
                config: config.clone(),
                events,
            }),
            tasks: TaskSet::new(),
            next_batch: AtomicU64::new(1),
        }
    }

    pub fn job(&self) -> &JobId {
        &self.shared.job
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReconcileEvent> {
        self.shared.events.subscribe()
    }

    /// Current status of `id`; ids never seen read as unindexed.
    pub fn status(&self, id: &ResourceId) -> IndexStatus {
        self.shared.lock().get(id)
    }

    /// Every status known so far.
    pub fn statuses(&self) -> HashMap<ResourceId, IndexStatus> {
        self.shared.lock().snapshot()
    }

    /// Number of poll loops still running.
    pub fn active_batches(&self) -> usize {
        self.tasks.len() - usize::from(self.tasks.contains(&TaskKey::Resync))
    }

    /// Add `ids` to the job and start watching them.
    ///
    /// Ids already indexed or on their way are skipped; the rest become
    /// pending at once and are submitted as one membership update followed
    /// by a sync trigger. Returns `None` if nothing needed submitting.
    ///
    /// If the update fails, every submitted id is marked as errored, a
    /// single [`ReconcileEvent::MembershipUpdateFailed`] is broadcast and the
    /// error is returned.
    #[instrument(skip(self, ids), fields(job = %self.shared.job, requested = ids.len()))]
    pub async fn request_index(&self, ids: &[ResourceId]) -> Result<Option<BatchId>> {
        let batch = BatchId(self.next_batch.fetch_add(1, Ordering::SeqCst));
        let accepted: Vec<ResourceId> = {
            let mut statuses = self.shared.lock();
            let mut seen = HashSet::new();
            let accepted: Vec<ResourceId> = ids
                .iter()
                .filter(|id| seen.insert(*id))
                .filter(|id| !matches!(statuses.get(id), IndexStatus::Indexed | IndexStatus::Pending | IndexStatus::Processing))
                .cloned()
                .collect();
            for id in &accepted {
                statuses.set_local(id, IndexStatus::Pending, Some(batch));
            }
            accepted
        };
        if accepted.is_empty() {
            tracing::debug!("Nothing to index");
            return Ok(None);
        }

        if let Err(err) = self.shared.add_members(&accepted).await {
            {
                let mut statuses = self.shared.lock();
                for id in &accepted {
                    if statuses.owner(id) == Some(batch) {
                        statuses.set_local(id, IndexStatus::Error, None);
                    }
                }
            }
            tracing::warn!(%batch, count = accepted.len(), error = %err, "Index request failed");
            self.shared.emit(ReconcileEvent::MembershipUpdateFailed {
                action: Action::Index,
                reason: err.to_string(),
                ids: accepted,
            });
            return Err(err.raise(ErrorKind::MembershipUpdateFailed(self.shared.job.to_string())));
        }

        tracing::info!(%batch, count = accepted.len(), "Index requested");
        self.shared.emit(ReconcileEvent::BatchStarted { batch, ids: accepted.clone() });
        let shared = Arc::clone(&self.shared);
        self.tasks.spawn(TaskKey::Batch(batch), move |_| poll::run(shared, batch, accepted));
        Ok(Some(batch))
    }

    /// Remove `ids` from the job.
    ///
    /// Callers pass ids that are currently indexed; nothing is filtered
    /// here. The ids are de-indexing until the membership update returns,
    /// then unindexed (or errored, if it failed). A successful removal is
    /// followed by a full resync.
    #[instrument(skip(self, ids), fields(job = %self.shared.job, requested = ids.len()))]
    pub async fn request_de_index(&self, ids: &[ResourceId]) -> Result<()> {
        let ids: Vec<ResourceId> = ids.iter().cloned().collect::<IndexSet<_>>().into_iter().collect();
        if ids.is_empty() {
            return Ok(());
        }
        {
            let mut statuses = self.shared.lock();
            for id in &ids {
                statuses.set_local(id, IndexStatus::DeIndexing, None);
            }
        }

        if let Err(err) = self.shared.remove_members(&ids).await {
            {
                let mut statuses = self.shared.lock();
                for id in &ids {
                    statuses.replace_local(id, IndexStatus::DeIndexing, IndexStatus::Error);
                }
            }
            tracing::warn!(count = ids.len(), error = %err, "De-index request failed");
            self.shared.emit(ReconcileEvent::MembershipUpdateFailed {
                action: Action::DeIndex,
                reason: err.to_string(),
                ids,
            });
            return Err(err.raise(ErrorKind::MembershipUpdateFailed(self.shared.job.to_string())));
        }

        {
            let mut statuses = self.shared.lock();
            for id in &ids {
                statuses.replace_local(id, IndexStatus::DeIndexing, IndexStatus::Unindexed);
            }
        }
        tracing::info!(count = ids.len(), "De-indexed");
        self.shared.emit(ReconcileEvent::DeIndexed { ids });
        if let Err(err) = self.shared.resync().await {
            tracing::warn!(error = ?err, "Resync after de-indexing failed");
        }
        Ok(())
    }

    /// Copy the remote view over every known id that is not protected.
    /// Returns how many statuses changed.
    pub async fn resync(&self) -> Result<usize> {
        self.shared.resync().await
    }

    /// Resync on a fixed interval in the background until shut down.
    /// Starting it again restarts the timer.
    pub fn start_resync(&self) {
        let shared = Arc::clone(&self.shared);
        let period = shared.config.resync_interval();
        self.tasks.spawn(TaskKey::Resync, move |_| async move {
            let mut ticks = tokio::time::interval_at(Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                if let Err(err) = shared.resync().await {
                    tracing::warn!(error = ?err, "Periodic resync failed");
                }
            }
        });
    }

    pub fn stop_resync(&self) -> bool {
        self.tasks.cancel(&TaskKey::Resync)
    }

    /// Wait for every running poll loop to settle. Does not return while the
    /// resync timer is running.
    pub async fn join(&self) {
        self.tasks.join().await;
    }

    /// Cancel all background work and wait for it to stop. Statuses of
    /// batches still being watched are left as they are.
    pub async fn shutdown(&self) {
        self.tasks.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kbsync_remote::RemoteStatus;
    use kbsync_remote::backend::MockRemote;
    use std::time::Duration;

    const JOB: &str = "kb";

    fn config(max_attempts: u32) -> ReconcileConfig {
        ReconcileConfig {
            poll_interval_ms: 1_000,
            max_attempts,
            resync_interval_ms: 10_000,
            protect_window_ms: 30_000,
        }
    }

    fn reconciler(remote: &Arc<MockRemote>, max_attempts: u32) -> Reconciler {
        Reconciler::new(remote.clone(), JobId::from(JOB), &config(max_attempts))
    }

    fn ids(ids: &[&str]) -> Vec<ResourceId> {
        ids.iter().copied().map(ResourceId::from).collect()
    }

    async fn settled(events: &mut broadcast::Receiver<ReconcileEvent>, batch: BatchId) -> BatchOutcome {
        loop {
            match events.recv().await {
                Ok(ReconcileEvent::BatchSettled { batch: settled, outcome }) if settled == batch => return outcome,
                Ok(_) => {},
                Err(err) => panic!("event stream ended: {err}"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_bulk_index_then_timeout() {
        let remote = Arc::new(MockRemote::default());
        remote.script_status(
            "a",
            [Some(RemoteStatus::Pending), Some(RemoteStatus::Processing), Some(RemoteStatus::Indexed)],
        );
        let reconciler = reconciler(&remote, 5);
        let mut events = reconciler.subscribe();
        let started = Instant::now();

        let batch = reconciler.request_index(&ids(&["a", "b"])).await.unwrap().unwrap();
        assert_eq!(reconciler.status(&ResourceId::from("a")), IndexStatus::Pending);
        assert_eq!(reconciler.status(&ResourceId::from("b")), IndexStatus::Pending);
        assert_eq!(remote.members(&JobId::from(JOB)), ids(&["a", "b"]));
        assert_eq!(remote.membership_writes(), 1);
        assert_eq!(remote.sync_triggers(), 1);

        let outcome = settled(&mut events, batch).await;
        assert_eq!(outcome, BatchOutcome { indexed: 1, timed_out: 1, ..Default::default() });
        assert_eq!(reconciler.status(&ResourceId::from("a")), IndexStatus::Indexed);
        assert_eq!(reconciler.status(&ResourceId::from("b")), IndexStatus::Timeout);
        assert_eq!(remote.status_calls(), 5);
        assert_eq!(started.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_stops_once_everything_is_terminal() {
        let remote = Arc::new(MockRemote::default());
        remote.script_status("a", [Some(RemoteStatus::Processing), Some(RemoteStatus::Indexed)]);
        remote.set_status("b", RemoteStatus::Error);
        let reconciler = reconciler(&remote, 20);
        let mut events = reconciler.subscribe();
        let batch = reconciler.request_index(&ids(&["a", "b"])).await.unwrap().unwrap();
        let outcome = settled(&mut events, batch).await;
        assert_eq!(outcome, BatchOutcome { indexed: 1, errored: 1, ..Default::default() });
        assert_eq!(remote.status_calls(), 2);
        reconciler.join().await;
        assert_eq!(reconciler.active_batches(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_polls_are_retried() {
        let remote = Arc::new(MockRemote::default());
        remote.set_status("a", RemoteStatus::Indexed);
        remote.fail_status_calls(2);
        let reconciler = reconciler(&remote, 5);
        let mut events = reconciler.subscribe();
        let batch = reconciler.request_index(&ids(&["a"])).await.unwrap().unwrap();
        assert_eq!(settled(&mut events, batch).await.indexed, 1);
        assert_eq!(remote.status_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_failing_to_the_end_time_out() {
        let remote = Arc::new(MockRemote::default());
        remote.set_status("a", RemoteStatus::Indexed);
        remote.fail_status_calls(10);
        let reconciler = reconciler(&remote, 3);
        let mut events = reconciler.subscribe();
        let batch = reconciler.request_index(&ids(&["a"])).await.unwrap().unwrap();
        assert_eq!(settled(&mut events, batch).await.timed_out, 1);
        assert_eq!(reconciler.status(&ResourceId::from("a")), IndexStatus::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_membership_failure_marks_whole_batch_once() {
        let remote = Arc::new(MockRemote::default());
        remote.fail_membership(true);
        let reconciler = reconciler(&remote, 5);
        let mut events = reconciler.subscribe();
        let err = reconciler.request_index(&ids(&["a", "b"])).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::MembershipUpdateFailed(job) if job == JOB));
        assert_eq!(reconciler.status(&ResourceId::from("a")), IndexStatus::Error);
        assert_eq!(reconciler.status(&ResourceId::from("b")), IndexStatus::Error);
        match events.try_recv().unwrap() {
            ReconcileEvent::MembershipUpdateFailed { action, ids: failed, .. } => {
                assert_eq!(action, Action::Index);
                assert_eq!(failed, ids(&["a", "b"]));
            },
            other => panic!("unexpected event {other:?}"),
        }
        assert!(events.try_recv().is_err());
        assert_eq!(reconciler.active_batches(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_index_is_idempotent_union() {
        let remote = Arc::new(MockRemote::default());
        remote.set_members(&JobId::from(JOB), ["x"]);
        let reconciler = reconciler(&remote, 1);
        reconciler.request_index(&ids(&["a", "b"])).await.unwrap();
        reconciler.join().await;
        // Both timed out, so they can be requested again.
        reconciler.request_index(&ids(&["a", "b", "a"])).await.unwrap();
        reconciler.join().await;
        assert_eq!(remote.members(&JobId::from(JOB)), ids(&["x", "a", "b"]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_and_indexed_ids_are_skipped() {
        let remote = Arc::new(MockRemote::default());
        remote.set_status("a", RemoteStatus::Indexed);
        let reconciler = reconciler(&remote, 5);
        let mut events = reconciler.subscribe();
        let batch = reconciler.request_index(&ids(&["a"])).await.unwrap().unwrap();
        settled(&mut events, batch).await;

        assert_eq!(reconciler.request_index(&ids(&["a"])).await.unwrap(), None);
        remote.script_status("b", [None]);
        reconciler.request_index(&ids(&["b"])).await.unwrap();
        assert_eq!(reconciler.request_index(&ids(&["b"])).await.unwrap(), None);
        assert_eq!(remote.membership_writes(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_de_index_moves_through_protected_state() {
        let remote = Arc::new(MockRemote::default());
        let job = JobId::from(JOB);
        remote.set_members(&job, ["a", "b"]);
        remote.set_status("a", RemoteStatus::Indexed);
        remote.set_status("b", RemoteStatus::Indexed);
        let reconciler = reconciler(&remote, 5);
        reconciler.resync().await.unwrap();
        assert_eq!(reconciler.status(&ResourceId::from("a")), IndexStatus::Indexed);

        reconciler.request_de_index(&ids(&["a"])).await.unwrap();
        assert_eq!(remote.members(&job), ids(&["b"]));
        // The remote still annotates `a` as indexed, but the removal wins.
        assert_eq!(reconciler.status(&ResourceId::from("a")), IndexStatus::Unindexed);
        assert_eq!(reconciler.status(&ResourceId::from("b")), IndexStatus::Indexed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resync_does_not_clobber_de_indexing() {
        let remote = Arc::new(MockRemote::default());
        let job = JobId::from(JOB);
        remote.set_members(&job, ["a"]);
        remote.set_status("a", RemoteStatus::Indexed);
        let reconciler = reconciler(&remote, 5);
        reconciler.resync().await.unwrap();

        // As if the removal call were still in flight.
        reconciler.shared.lock().set_local(&ResourceId::from("a"), IndexStatus::DeIndexing, None);
        assert_eq!(reconciler.resync().await.unwrap(), 0);
        tokio::time::advance(Duration::from_secs(3_600)).await;
        reconciler.resync().await.unwrap();
        assert_eq!(reconciler.status(&ResourceId::from("a")), IndexStatus::DeIndexing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resync_during_pending_removal_keeps_de_indexing() {
        let remote = Arc::new(MockRemote::default().with_write_latency(Duration::from_secs(1)));
        let job = JobId::from(JOB);
        remote.set_members(&job, ["a"]);
        remote.set_status("a", RemoteStatus::Indexed);
        let reconciler = reconciler(&remote, 5);
        reconciler.resync().await.unwrap();
        let a = ResourceId::from("a");

        let removing = reconciler.request_de_index(std::slice::from_ref(&a));
        let meanwhile = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let updated = reconciler.resync().await.unwrap();
            (updated, reconciler.status(&a))
        };
        let (removed, (updated, during)) = tokio::join!(removing, meanwhile);
        removed.unwrap();
        assert_eq!((updated, during), (0, IndexStatus::DeIndexing));
        assert_eq!(reconciler.status(&a), IndexStatus::Unindexed);
        assert!(remote.members(&job).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_de_index_failure_marks_error() {
        let remote = Arc::new(MockRemote::default());
        remote.fail_membership(true);
        let reconciler = reconciler(&remote, 5);
        let mut events = reconciler.subscribe();
        assert!(reconciler.request_de_index(&ids(&["a", "b"])).await.is_err());
        assert_eq!(reconciler.status(&ResourceId::from("a")), IndexStatus::Error);
        assert!(matches!(
            events.try_recv().unwrap(),
            ReconcileEvent::MembershipUpdateFailed { action: Action::DeIndex, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resync_maps_remote_view() {
        let remote = Arc::new(MockRemote::default());
        let job = JobId::from(JOB);
        remote.set_members(&job, ["member", "annotated"]);
        remote.set_status("annotated", RemoteStatus::Processing);
        remote.set_status("stale", RemoteStatus::Error);
        let reconciler = reconciler(&remote, 5);
        assert_eq!(reconciler.resync().await.unwrap(), 2);
        assert_eq!(reconciler.status(&ResourceId::from("member")), IndexStatus::Pending);
        assert_eq!(reconciler.status(&ResourceId::from("annotated")), IndexStatus::Processing);
        // Never referenced, so not known.
        assert_eq!(reconciler.statuses().len(), 2);

        remote.set_members(&job, ["annotated"]);
        assert_eq!(reconciler.resync().await.unwrap(), 1);
        assert_eq!(reconciler.status(&ResourceId::from("member")), IndexStatus::Unindexed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_resync_runs_on_interval() {
        let remote = Arc::new(MockRemote::default());
        let job = JobId::from(JOB);
        let reconciler = reconciler(&remote, 5);
        let mut events = reconciler.subscribe();
        reconciler.start_resync();
        remote.set_members(&job, ["a"]);
        remote.set_status("a", RemoteStatus::Indexed);

        tokio::time::sleep(Duration::from_millis(9_990)).await;
        assert_eq!(reconciler.status(&ResourceId::from("a")), IndexStatus::Unindexed);
        assert_eq!(events.recv().await.unwrap(), ReconcileEvent::Resynced { updated: 1 });
        assert_eq!(reconciler.status(&ResourceId::from("a")), IndexStatus::Indexed);

        assert!(reconciler.stop_resync());
        reconciler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_batch_supersedes_older_poll() {
        let remote = Arc::new(MockRemote::default());
        let reconciler = reconciler(&remote, 3);
        let mut events = reconciler.subscribe();
        let first = reconciler.request_index(&ids(&["a"])).await.unwrap().unwrap();
        // Something moved `a` out of flight, so it may be requested again.
        reconciler.shared.lock().set_local(&ResourceId::from("a"), IndexStatus::Error, None);
        let second = reconciler.request_index(&ids(&["a"])).await.unwrap().unwrap();
        remote.set_status("a", RemoteStatus::Indexed);

        let mut outcomes = HashMap::new();
        while outcomes.len() < 2 {
            if let ReconcileEvent::BatchSettled { batch, outcome } = events.recv().await.unwrap() {
                outcomes.insert(batch, outcome);
            }
        }
        assert_eq!(outcomes[&first], BatchOutcome { superseded: 1, ..Default::default() });
        assert_eq!(outcomes[&second], BatchOutcome { indexed: 1, ..Default::default() });
        assert_eq!(reconciler.status(&ResourceId::from("a")), IndexStatus::Indexed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_poll_loops() {
        let remote = Arc::new(MockRemote::default());
        let reconciler = reconciler(&remote, 100);
        reconciler.request_index(&ids(&["a"])).await.unwrap();
        assert_eq!(reconciler.active_batches(), 1);
        reconciler.shutdown().await;
        assert_eq!(reconciler.active_batches(), 0);
        assert_eq!(reconciler.status(&ResourceId::from("a")), IndexStatus::Pending);
    }
}
