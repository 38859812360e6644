use crate::reconcile::error::ErrorKind;
use crate::reconcile::{BatchId, IndexStatus, ReconcileEvent, Shared};
use kbsync_remote::ResourceId;
use std::sync::Arc;
use tracing::instrument;

/// Poll the remote until every id of `batch` is terminal, a later action has
/// taken it over, or the attempt budget runs out. Whatever is still waiting
/// at that point times out.
#[instrument(name = "poll", skip_all, fields(%batch, job = %shared.job))]
pub(super) async fn run(shared: Arc<Shared>, batch: BatchId, ids: Vec<ResourceId>) {
    let interval = shared.config.poll_interval();
    let max_attempts = shared.config.max_attempts;
    for attempt in 1..=max_attempts {
        tokio::time::sleep(interval).await;
        let waiting = shared.lock().waiting_on(batch, &ids);
        if waiting.is_empty() {
            break;
        }
        let annotations = match shared.remote.resource_statuses(&shared.job, &waiting).await {
            Ok(annotations) => annotations,
            Err(err) => {
                let err = err.raise(ErrorKind::StatusPollFailed(batch.to_string()));
                tracing::warn!(attempt, max_attempts, error = ?err, "Status poll failed; retrying");
                continue;
            },
        };
        let remaining = {
            let mut statuses = shared.lock();
            for id in &waiting {
                if let Some(status) = annotations.get(id) {
                    statuses.apply_poll(id, batch, IndexStatus::from(*status));
                }
            }
            statuses.waiting_on(batch, &waiting).len()
        };
        tracing::debug!(attempt, remaining, "Polled batch");
        if remaining == 0 {
            break;
        }
    }
    let outcome = shared.lock().settle(batch, &ids);
    if outcome.timed_out > 0 {
        tracing::warn!(timed_out = outcome.timed_out, max_attempts, "Batch did not finish indexing in time");
    }
    tracing::info!(
        indexed = outcome.indexed,
        errored = outcome.errored,
        timed_out = outcome.timed_out,
        superseded = outcome.superseded,
        "Batch settled"
    );
    shared.emit(ReconcileEvent::BatchSettled { batch, outcome });
}
