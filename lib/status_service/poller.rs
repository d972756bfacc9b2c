use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{info, warn};

use super::types::{AttemptOutcome, TransformVerdict};
use crate::gateway::{CallOutcome, MetadataArtifact, PollResponse, TransformGateway};
use crate::queue::TransformStatusTask;
use crate::server::monitoring::POLLER_METRICS;

/// One poll attempt for one task, including its side effects.
pub trait StatusPoller: Send + Sync {
    fn poll_once<'a>(&'a self, task: &'a TransformStatusTask) -> BoxFuture<'a, AttemptOutcome>;
}

impl<T> StatusPoller for Arc<T>
where
    T: StatusPoller + ?Sized,
{
    fn poll_once<'a>(&'a self, task: &'a TransformStatusTask) -> BoxFuture<'a, AttemptOutcome> {
        (**self).poll_once(task)
    }
}

/// Reconciliation hooks the poller drives once a transform job is terminal.
pub trait DatasetLifecycle: Send + Sync {
    /// Promotes the dataset using the transform's metadata artifacts.
    fn on_transform_done<'a>(
        &'a self,
        dataset_id: &'a str,
        metadata: &'a [MetadataArtifact],
    ) -> BoxFuture<'a, CallOutcome>;

    fn on_transform_failed<'a>(&'a self, dataset_id: &'a str) -> BoxFuture<'a, CallOutcome>;
}

impl<T> DatasetLifecycle for Arc<T>
where
    T: DatasetLifecycle + ?Sized,
{
    fn on_transform_done<'a>(
        &'a self,
        dataset_id: &'a str,
        metadata: &'a [MetadataArtifact],
    ) -> BoxFuture<'a, CallOutcome> {
        (**self).on_transform_done(dataset_id, metadata)
    }

    fn on_transform_failed<'a>(&'a self, dataset_id: &'a str) -> BoxFuture<'a, CallOutcome> {
        (**self).on_transform_failed(dataset_id)
    }
}

/// Polls the transform service and reconciles terminal jobs through a
/// [`DatasetLifecycle`].
pub struct TransformStatusPoller<T, L> {
    transform: T,
    lifecycle: L,
}

impl<T, L> TransformStatusPoller<T, L>
where
    T: TransformGateway,
    L: DatasetLifecycle,
{
    pub fn new(transform: T, lifecycle: L) -> Self {
        Self {
            transform,
            lifecycle,
        }
    }

    async fn settle(
        &self,
        task: &TransformStatusTask,
        outcome: CallOutcome,
        verdict: TransformVerdict,
    ) -> AttemptOutcome {
        match outcome {
            CallOutcome::Success | CallOutcome::NotFound => {
                if outcome == CallOutcome::NotFound {
                    info!(
                        event = "reconciliation_target_missing",
                        dataset_id = %task.dataset_id,
                        verdict = verdict.as_str(),
                        "dataset already gone downstream; nothing left to finalize"
                    );
                }
                self.discard_transform_record(task).await;
                AttemptOutcome::Finalized(verdict)
            }
            CallOutcome::BadRequest(reason) => AttemptOutcome::Rejected(reason),
            CallOutcome::Transient(reason) => AttemptOutcome::Retry(reason),
        }
    }

    async fn discard_transform_record(&self, task: &TransformStatusTask) {
        if let Err(err) = self.transform.discard(&task.transform_status_url).await {
            warn!(
                event = "transform_record_cleanup_failed",
                dataset_id = %task.dataset_id,
                transform_status_url = %task.transform_status_url,
                error = %err,
                "could not discard transform status record"
            );
            if let Some(metrics) = POLLER_METRICS.get() {
                metrics.cleanup_failures_total.inc();
            }
        }
    }
}

impl<T, L> StatusPoller for TransformStatusPoller<T, L>
where
    T: TransformGateway,
    L: DatasetLifecycle,
{
    fn poll_once<'a>(&'a self, task: &'a TransformStatusTask) -> BoxFuture<'a, AttemptOutcome> {
        Box::pin(async move {
            if let Some(metrics) = POLLER_METRICS.get() {
                metrics.polls_total.inc();
            }

            match self.transform.poll(&task.transform_status_url).await {
                PollResponse::InProgress => {
                    AttemptOutcome::Retry("transform still in progress".to_string())
                }
                PollResponse::Transient(reason) => AttemptOutcome::Retry(reason),
                PollResponse::NotFound => {
                    info!(
                        event = "transform_job_vanished",
                        dataset_id = %task.dataset_id,
                        transform_status_url = %task.transform_status_url,
                        "transform service no longer knows this job; dropping task"
                    );
                    AttemptOutcome::Vanished
                }
                PollResponse::Done(metadata) => {
                    let outcome = self
                        .lifecycle
                        .on_transform_done(&task.dataset_id, &metadata)
                        .await;
                    self.settle(task, outcome, TransformVerdict::Promoted).await
                }
                PollResponse::Failed(_) => {
                    let outcome = self.lifecycle.on_transform_failed(&task.dataset_id).await;
                    self.settle(task, outcome, TransformVerdict::Quarantined)
                        .await
                }
            }
        })
    }
}
