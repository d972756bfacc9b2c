use std::sync::Arc;

use tokio::sync::OwnedSemaphorePermit;
use tracing::{debug, error, info, warn};

use super::dead_letter::{DeadLetterLog, DeadLetterReason, DeadLetterRecord};
use super::poller::StatusPoller;
use super::types::{AttemptOutcome, RetryPolicy, TransformVerdict};
use crate::queue::{QueueError, TaskQueue, TransformStatusTask};
use crate::server::monitoring::POLLER_METRICS;

/// How one drain cycle ended for its task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleDisposition {
    Completed(TransformVerdict),
    Dropped,
    DeadLettered(DeadLetterReason),
    Requeued,
    /// The queue closed while the task waited to be put back.
    Lost,
}

/// Runs drain cycles: wait out the task's interval, poll once, act on the
/// outcome.
pub struct PollWorker {
    queue: Arc<TaskQueue>,
    poller: Arc<dyn StatusPoller>,
    retry_policy: RetryPolicy,
    dead_letters: Arc<DeadLetterLog>,
}

impl PollWorker {
    pub fn new(
        queue: Arc<TaskQueue>,
        poller: Arc<dyn StatusPoller>,
        retry_policy: RetryPolicy,
        dead_letters: Arc<DeadLetterLog>,
    ) -> Self {
        Self {
            queue,
            poller,
            retry_policy,
            dead_letters,
        }
    }

    /// Runs one drain cycle for `task` while holding one worker-pool slot.
    pub async fn run_cycle(
        &self,
        task: TransformStatusTask,
        slot: OwnedSemaphorePermit,
    ) -> CycleDisposition {
        let wait = task.ready_in();
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }

        match self.poller.poll_once(&task).await {
            AttemptOutcome::Finalized(verdict) => {
                info!(
                    event = "transform_task_completed",
                    dataset_id = %task.dataset_id,
                    verdict = verdict.as_str(),
                    attempts = task.attempts + 1,
                    "transform task finalized"
                );
                if let Some(metrics) = POLLER_METRICS.get() {
                    metrics.completions_total.inc();
                }
                CycleDisposition::Completed(verdict)
            }
            AttemptOutcome::Vanished => {
                if let Some(metrics) = POLLER_METRICS.get() {
                    metrics.vanished_total.inc();
                }
                CycleDisposition::Dropped
            }
            AttemptOutcome::Rejected(reason) => {
                if let Some(metrics) = POLLER_METRICS.get() {
                    metrics.rejected_total.inc();
                }
                let spent = task.next_attempt(self.retry_policy.wait_interval);
                self.dead_letter(&spent, DeadLetterReason::Rejected, reason);
                CycleDisposition::DeadLettered(DeadLetterReason::Rejected)
            }
            AttemptOutcome::Retry(reason) => {
                let next = task.next_attempt(self.retry_policy.wait_interval);
                if self.retry_policy.is_exhausted(&next) {
                    self.dead_letter(&next, DeadLetterReason::BudgetExhausted, reason);
                    return CycleDisposition::DeadLettered(DeadLetterReason::BudgetExhausted);
                }

                debug!(
                    event = "transform_task_retry",
                    dataset_id = %next.dataset_id,
                    attempts = next.attempts,
                    reason = %reason,
                    "transform task re-queued"
                );
                self.requeue(next, slot).await
            }
        }
    }

    /// Puts `task` back on the queue. When the queue is full the slot is
    /// released before waiting, so the dequeuer can keep draining.
    async fn requeue(
        &self,
        task: TransformStatusTask,
        slot: OwnedSemaphorePermit,
    ) -> CycleDisposition {
        let task = match self.queue.try_enqueue(task) {
            Ok(()) => {
                if let Some(metrics) = POLLER_METRICS.get() {
                    metrics.requeues_total.inc();
                }
                return CycleDisposition::Requeued;
            }
            Err(QueueError::Full { task, capacity }) => {
                debug!(
                    event = "transform_task_requeue_blocked",
                    dataset_id = %task.dataset_id,
                    capacity,
                    "queue full; releasing worker slot before re-queue"
                );
                task
            }
            Err(QueueError::Closed) => return self.lost(),
        };

        if let Some(metrics) = POLLER_METRICS.get() {
            metrics.queue_overflow_total.inc();
        }
        drop(slot);

        match self.queue.enqueue(task).await {
            Ok(()) => {
                if let Some(metrics) = POLLER_METRICS.get() {
                    metrics.requeues_total.inc();
                }
                CycleDisposition::Requeued
            }
            Err(_) => self.lost(),
        }
    }

    fn lost(&self) -> CycleDisposition {
        warn!(
            event = "transform_task_lost",
            "task queue closed before the task could be re-queued"
        );
        CycleDisposition::Lost
    }

    fn dead_letter(&self, task: &TransformStatusTask, reason: DeadLetterReason, message: String) {
        error!(
            event = "transform_task_dead_lettered",
            dataset_id = %task.dataset_id,
            transform_status_url = %task.transform_status_url,
            attempts = task.attempts,
            reason = reason.as_str(),
            message = %message,
            "transform task abandoned"
        );
        if let Some(metrics) = POLLER_METRICS.get() {
            metrics.dead_lettered_total.inc();
        }
        self.dead_letters
            .record(DeadLetterRecord::from_task(task, reason, message));
    }
}
