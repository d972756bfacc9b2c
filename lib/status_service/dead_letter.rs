use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::queue::TransformStatusTask;

/// Why a task was abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterReason {
    BudgetExhausted,
    Rejected,
}

impl DeadLetterReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BudgetExhausted => "budget_exhausted",
            Self::Rejected => "rejected",
        }
    }
}

/// Triage record for one abandoned task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeadLetterRecord {
    pub dataset_id: String,
    pub transform_status_url: String,
    pub attempts: u32,
    pub reason: DeadLetterReason,
    pub message: String,
    pub recorded_at_epoch_ms: u64,
}

impl DeadLetterRecord {
    pub fn from_task(
        task: &TransformStatusTask,
        reason: DeadLetterReason,
        message: impl Into<String>,
    ) -> Self {
        let recorded_at_epoch_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| duration.as_millis() as u64)
            .unwrap_or_default();
        Self {
            dataset_id: task.dataset_id.clone(),
            transform_status_url: task.transform_status_url.clone(),
            attempts: task.attempts,
            reason,
            message: message.into(),
            recorded_at_epoch_ms,
        }
    }
}

/// Bounded ring of the most recent dead letters; the oldest entry is evicted
/// once `capacity` is reached.
pub struct DeadLetterLog {
    records: Mutex<VecDeque<DeadLetterRecord>>,
    capacity: usize,
}

impl DeadLetterLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity.min(1_024))),
            capacity,
        }
    }

    pub fn record(&self, record: DeadLetterRecord) {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Oldest first.
    pub fn snapshot(&self) -> Vec<DeadLetterRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
