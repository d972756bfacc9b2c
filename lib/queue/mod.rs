use std::time::Duration;

use flume::{Receiver, Sender, TrySendError};
use thiserror::Error;
use tokio::time::Instant;

use crate::server::monitoring::POLLER_METRICS;

pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// "Keep checking this dataset's transform job."
///
/// A task is never changed after it is queued; a retry produces a new value
/// through [`TransformStatusTask::next_attempt`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformStatusTask {
    pub dataset_id: String,
    pub transform_status_url: String,
    /// Poll attempts already made, across every drain cycle.
    pub attempts: u32,
    pub created_at: Instant,
    /// Earliest instant the next attempt may run.
    pub not_before: Option<Instant>,
}

impl TransformStatusTask {
    pub fn new(dataset_id: impl Into<String>, transform_status_url: impl Into<String>) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            transform_status_url: transform_status_url.into(),
            attempts: 0,
            created_at: Instant::now(),
            not_before: None,
        }
    }

    /// Returns the follow-up task after one more spent attempt.
    pub fn next_attempt(&self, wait: Duration) -> Self {
        Self {
            dataset_id: self.dataset_id.clone(),
            transform_status_url: self.transform_status_url.clone(),
            attempts: self.attempts.saturating_add(1),
            created_at: self.created_at,
            not_before: Some(Instant::now() + wait),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Time left before the task may be polled again; zero when ready.
    pub fn ready_in(&self) -> Duration {
        self.not_before
            .map(|at| at.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::ZERO)
    }
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("task queue is at capacity ({capacity})")]
    Full {
        task: TransformStatusTask,
        capacity: usize,
    },

    #[error("task queue is closed")]
    Closed,
}

/// Bounded in-memory FIFO of pending poll tasks.
///
/// `enqueue` waits for room, `try_enqueue` hands the task back when full, and
/// `dequeue` waits for an item. Safe for any number of concurrent producers
/// and consumers.
pub struct TaskQueue {
    sender: Sender<TransformStatusTask>,
    receiver: Receiver<TransformStatusTask>,
    capacity: usize,
}

impl TaskQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = flume::bounded(capacity);
        Self {
            sender,
            receiver,
            capacity,
        }
    }

    pub async fn enqueue(&self, task: TransformStatusTask) -> Result<(), QueueError> {
        self.sender
            .send_async(task)
            .await
            .map_err(|_| QueueError::Closed)?;
        self.record_depth();
        Ok(())
    }

    pub fn try_enqueue(&self, task: TransformStatusTask) -> Result<(), QueueError> {
        match self.sender.try_send(task) {
            Ok(()) => {
                self.record_depth();
                Ok(())
            }
            Err(TrySendError::Full(task)) => Err(QueueError::Full {
                task,
                capacity: self.capacity,
            }),
            Err(TrySendError::Disconnected(_)) => Err(QueueError::Closed),
        }
    }

    pub async fn dequeue(&self) -> Result<TransformStatusTask, QueueError> {
        let task = self
            .receiver
            .recv_async()
            .await
            .map_err(|_| QueueError::Closed)?;
        self.record_depth();
        Ok(task)
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn record_depth(&self) {
        if let Some(metrics) = POLLER_METRICS.get() {
            metrics.queue_depth.set(self.len() as i64);
        }
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}
