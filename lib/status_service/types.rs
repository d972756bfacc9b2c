use std::time::Duration;

use crate::queue::{TransformStatusTask, DEFAULT_QUEUE_CAPACITY};

/// When a task stops being retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopStrategy {
    /// Total poll attempts including the first.
    MaxAttempts(u32),
    /// Time since the task was first created.
    MaxElapsed(Duration),
}

/// Retry budget applied to a task's cumulative attempt counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub wait_interval: Duration,
    pub stop: StopStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            wait_interval: Duration::from_secs(5),
            stop: StopStrategy::MaxAttempts(12),
        }
    }
}

impl RetryPolicy {
    /// True once `task` has spent its budget. `task.attempts` must already
    /// include the attempt that just ran.
    pub fn is_exhausted(&self, task: &TransformStatusTask) -> bool {
        match self.stop {
            StopStrategy::MaxAttempts(max) => task.attempts >= max.max(1),
            StopStrategy::MaxElapsed(limit) => task.elapsed() + self.wait_interval > limit,
        }
    }
}

/// Scheduler settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusServiceConfig {
    pub pool_size: usize,
    pub queue_capacity: usize,
    pub retry_policy: RetryPolicy,
    pub dead_letter_capacity: usize,
}

impl Default for StatusServiceConfig {
    fn default() -> Self {
        Self {
            pool_size: 64,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            retry_policy: RetryPolicy::default(),
            dead_letter_capacity: 1_000,
        }
    }
}

/// Terminal transform result handed to the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformVerdict {
    Promoted,
    Quarantined,
}

impl TransformVerdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Promoted => "promoted",
            Self::Quarantined => "quarantined",
        }
    }
}

/// What one poll attempt decided for its task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Promotion or quarantine completed.
    Finalized(TransformVerdict),
    /// The transform job or its dataset is gone; nothing to do.
    Vanished,
    /// A collaborator refused the request as malformed; never retried.
    Rejected(String),
    /// Try again on a later cycle.
    Retry(String),
}
