pub mod dead_letter;
pub mod poller;
pub mod types;
pub mod worker;


use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use dead_letter::{DeadLetterLog, DeadLetterReason, DeadLetterRecord};
pub use poller::{DatasetLifecycle, StatusPoller, TransformStatusPoller};
pub use types::{
    AttemptOutcome, RetryPolicy, StatusServiceConfig, StopStrategy, TransformVerdict,
};
pub use worker::{CycleDisposition, PollWorker};

use crate::queue::TaskQueue;
use crate::server::monitoring::POLLER_METRICS;

/// Polling scheduler: one dequeuer fanning tasks out to a fixed-size pool of
/// workers.
pub struct StatusService {
    config: StatusServiceConfig,
    queue: Arc<TaskQueue>,
    dead_letters: Arc<DeadLetterLog>,
    slots: Arc<Semaphore>,
    running: Arc<AtomicUsize>,
}

impl StatusService {
    pub fn new(config: StatusServiceConfig) -> Self {
        let pool_size = config.pool_size.max(1);
        Self {
            config: StatusServiceConfig {
                pool_size,
                ..config
            },
            queue: Arc::new(TaskQueue::new(config.queue_capacity)),
            dead_letters: Arc::new(DeadLetterLog::new(config.dead_letter_capacity)),
            slots: Arc::new(Semaphore::new(pool_size)),
            running: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn config(&self) -> &StatusServiceConfig {
        &self.config
    }

    /// Producer handle for the orchestrator.
    pub fn queue(&self) -> Arc<TaskQueue> {
        self.queue.clone()
    }

    pub fn dead_letters(&self) -> Arc<DeadLetterLog> {
        self.dead_letters.clone()
    }

    /// Workers currently running a drain cycle. The slot the idle dequeuer
    /// holds while waiting for a task is not counted.
    pub fn busy_workers(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawns the dequeuer. It runs until `cancel` fires; queued and
    /// in-flight tasks are dropped at that point.
    pub fn start(&self, poller: Arc<dyn StatusPoller>, cancel: CancellationToken) -> JoinHandle<()> {
        let worker = Arc::new(PollWorker::new(
            self.queue.clone(),
            poller,
            self.config.retry_policy,
            self.dead_letters.clone(),
        ));
        let queue = self.queue.clone();
        let slots = self.slots.clone();
        let running = self.running.clone();
        let pool_size = self.config.pool_size;

        tokio::spawn(async move {
            info!(
                event = "status_service_started",
                pool_size,
                queue_capacity = queue.capacity(),
                "transform status scheduler started"
            );

            loop {
                let slot = tokio::select! {
                    _ = cancel.cancelled() => break,
                    slot = slots.clone().acquire_owned() => match slot {
                        Ok(slot) => slot,
                        Err(_) => break,
                    },
                };

                let task = tokio::select! {
                    _ = cancel.cancelled() => break,
                    task = queue.dequeue() => match task {
                        Ok(task) => task,
                        Err(err) => {
                            warn!(event = "status_service_queue_closed", error = %err, "stopping dequeuer");
                            break;
                        }
                    },
                };

                let worker = worker.clone();
                let cancel = cancel.clone();
                let running = running.clone();
                running.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    if let Some(metrics) = POLLER_METRICS.get() {
                        metrics.busy_workers.inc();
                    }
                    let dataset_id = task.dataset_id.clone();
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            debug!(
                                event = "transform_task_abandoned_on_shutdown",
                                dataset_id = %dataset_id,
                                "dropping in-flight task"
                            );
                        }
                        disposition = worker.run_cycle(task, slot) => {
                            debug!(
                                event = "drain_cycle_finished",
                                dataset_id = %dataset_id,
                                disposition = ?disposition,
                                "drain cycle finished"
                            );
                        }
                    }
                    running.fetch_sub(1, Ordering::SeqCst);
                    if let Some(metrics) = POLLER_METRICS.get() {
                        metrics.busy_workers.dec();
                    }
                });
            }

            info!(
                event = "status_service_stopped",
                queued_tasks = queue.len(),
                "transform status scheduler stopped"
            );
        })
    }
}
