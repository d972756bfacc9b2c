use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;

use crate::gateway::{
    CallOutcome, FetchedArtifact, GatewayError, IndexGateway, IndexRequest, MetadataArtifact,
    PollResponse, TransformGateway, TransformRequest,
};
use crate::queue::TransformStatusTask;
use crate::status_service::{
    AttemptOutcome, DatasetLifecycle, RetryPolicy, StatusPoller, StopStrategy, TransformVerdict,
};

pub(crate) fn zero_wait_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        wait_interval: Duration::ZERO,
        stop: StopStrategy::MaxAttempts(max_attempts),
    }
}

pub(crate) fn sample_task(dataset_id: &str) -> TransformStatusTask {
    TransformStatusTask::new(
        dataset_id,
        format!("http://transform.test/status/{dataset_id}"),
    )
}

pub(crate) fn metadata(metadata_type: &str, location: &str) -> MetadataArtifact {
    MetadataArtifact {
        metadata_type: metadata_type.to_string(),
        location: location.to_string(),
    }
}

/// Transform gateway with scripted answers.
///
/// Polls pop from one shared plan and report `Transient` once it runs dry.
/// Submissions succeed with `http://transform.test/status/{id}` unless a
/// failing status was scripted.
#[derive(Default)]
pub(crate) struct MockTransformGateway {
    polls: Mutex<VecDeque<PollResponse>>,
    submit_failures: Mutex<VecDeque<u16>>,
    discard_failures: Mutex<VecDeque<u16>>,
    artifacts: Mutex<HashMap<String, Result<FetchedArtifact, u16>>>,
    submitted: Mutex<Vec<TransformRequest>>,
    discarded: Mutex<Vec<String>>,
    poll_calls: AtomicU32,
}

impl MockTransformGateway {
    pub(crate) fn with_polls(polls: Vec<PollResponse>) -> Self {
        Self {
            polls: Mutex::new(polls.into_iter().collect()),
            ..Self::default()
        }
    }

    pub(crate) fn with_artifact(self, location: &str, media_type: &str, content: &'static [u8]) -> Self {
        self.artifacts.lock().expect("artifacts mutex poisoned").insert(
            location.to_string(),
            Ok(FetchedArtifact {
                media_type: media_type.to_string(),
                content: Bytes::from_static(content),
            }),
        );
        self
    }

    pub(crate) fn with_failing_artifact(self, location: &str, status: u16) -> Self {
        self.artifacts
            .lock()
            .expect("artifacts mutex poisoned")
            .insert(location.to_string(), Err(status));
        self
    }

    pub(crate) fn with_submit_failure(self, status: u16) -> Self {
        self.submit_failures
            .lock()
            .expect("submit_failures mutex poisoned")
            .push_back(status);
        self
    }

    pub(crate) fn with_discard_failure(self, status: u16) -> Self {
        self.discard_failures
            .lock()
            .expect("discard_failures mutex poisoned")
            .push_back(status);
        self
    }

    pub(crate) fn poll_calls(&self) -> u32 {
        self.poll_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn submitted(&self) -> Vec<TransformRequest> {
        self.submitted
            .lock()
            .expect("submitted mutex poisoned")
            .clone()
    }

    pub(crate) fn discarded(&self) -> Vec<String> {
        self.discarded
            .lock()
            .expect("discarded mutex poisoned")
            .clone()
    }
}

impl TransformGateway for MockTransformGateway {
    fn submit<'a>(
        &'a self,
        request: &'a TransformRequest,
    ) -> BoxFuture<'a, Result<String, GatewayError>> {
        Box::pin(async move {
            self.submitted
                .lock()
                .expect("submitted mutex poisoned")
                .push(request.clone());
            let failure = self
                .submit_failures
                .lock()
                .expect("submit_failures mutex poisoned")
                .pop_front();
            match failure {
                Some(status) => Err(GatewayError::UnexpectedStatus {
                    resource: "transform submission".to_string(),
                    status,
                }),
                None => Ok(format!("http://transform.test/status/{}", request.id)),
            }
        })
    }

    fn poll<'a>(&'a self, _status_url: &'a str) -> BoxFuture<'a, PollResponse> {
        Box::pin(async move {
            self.poll_calls.fetch_add(1, Ordering::SeqCst);
            self.polls
                .lock()
                .expect("polls mutex poisoned")
                .pop_front()
                .unwrap_or_else(|| PollResponse::Transient("scripted polls exhausted".to_string()))
        })
    }

    fn discard<'a>(&'a self, status_url: &'a str) -> BoxFuture<'a, Result<(), GatewayError>> {
        Box::pin(async move {
            self.discarded
                .lock()
                .expect("discarded mutex poisoned")
                .push(status_url.to_string());
            let failure = self
                .discard_failures
                .lock()
                .expect("discard_failures mutex poisoned")
                .pop_front();
            match failure {
                Some(status) => Err(GatewayError::UnexpectedStatus {
                    resource: status_url.to_string(),
                    status,
                }),
                None => Ok(()),
            }
        })
    }

    fn fetch_artifact<'a>(
        &'a self,
        location: &'a str,
    ) -> BoxFuture<'a, Result<FetchedArtifact, GatewayError>> {
        Box::pin(async move {
            let scripted = self
                .artifacts
                .lock()
                .expect("artifacts mutex poisoned")
                .get(location)
                .cloned();
            match scripted {
                Some(Ok(artifact)) => Ok(artifact),
                Some(Err(status)) => Err(GatewayError::UnexpectedStatus {
                    resource: location.to_string(),
                    status,
                }),
                None => Err(GatewayError::UnexpectedStatus {
                    resource: location.to_string(),
                    status: 404,
                }),
            }
        })
    }
}

/// Index gateway that answers from a plan and records every request;
/// `Success` once the plan is empty.
#[derive(Default)]
pub(crate) struct MockIndexGateway {
    outcomes: Mutex<VecDeque<CallOutcome>>,
    requests: Mutex<Vec<(String, IndexRequest)>>,
}

impl MockIndexGateway {
    pub(crate) fn with_outcomes(outcomes: Vec<CallOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn requests(&self) -> Vec<(String, IndexRequest)> {
        self.requests
            .lock()
            .expect("requests mutex poisoned")
            .clone()
    }
}

impl IndexGateway for MockIndexGateway {
    fn index<'a>(
        &'a self,
        dataset_id: &'a str,
        request: &'a IndexRequest,
    ) -> BoxFuture<'a, CallOutcome> {
        Box::pin(async move {
            self.requests
                .lock()
                .expect("requests mutex poisoned")
                .push((dataset_id.to_string(), request.clone()));
            self.outcomes
                .lock()
                .expect("outcomes mutex poisoned")
                .pop_front()
                .unwrap_or(CallOutcome::Success)
        })
    }
}

/// Lifecycle double that counts reconciliation calls.
#[derive(Default)]
pub(crate) struct MockLifecycle {
    done_outcomes: Mutex<VecDeque<CallOutcome>>,
    failed_outcomes: Mutex<VecDeque<CallOutcome>>,
    done_calls: AtomicU32,
    failed_calls: AtomicU32,
}

impl MockLifecycle {
    pub(crate) fn with_done_outcomes(outcomes: Vec<CallOutcome>) -> Self {
        Self {
            done_outcomes: Mutex::new(outcomes.into_iter().collect()),
            ..Self::default()
        }
    }

    pub(crate) fn with_failed_outcomes(outcomes: Vec<CallOutcome>) -> Self {
        Self {
            failed_outcomes: Mutex::new(outcomes.into_iter().collect()),
            ..Self::default()
        }
    }

    pub(crate) fn done_calls(&self) -> u32 {
        self.done_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn failed_calls(&self) -> u32 {
        self.failed_calls.load(Ordering::SeqCst)
    }
}

impl DatasetLifecycle for MockLifecycle {
    fn on_transform_done<'a>(
        &'a self,
        _dataset_id: &'a str,
        _metadata: &'a [MetadataArtifact],
    ) -> BoxFuture<'a, CallOutcome> {
        Box::pin(async move {
            self.done_calls.fetch_add(1, Ordering::SeqCst);
            self.done_outcomes
                .lock()
                .expect("done_outcomes mutex poisoned")
                .pop_front()
                .unwrap_or(CallOutcome::Success)
        })
    }

    fn on_transform_failed<'a>(&'a self, _dataset_id: &'a str) -> BoxFuture<'a, CallOutcome> {
        Box::pin(async move {
            self.failed_calls.fetch_add(1, Ordering::SeqCst);
            self.failed_outcomes
                .lock()
                .expect("failed_outcomes mutex poisoned")
                .pop_front()
                .unwrap_or(CallOutcome::Success)
        })
    }
}

/// Poller that skips HTTP entirely and replays attempt outcomes, finalizing
/// once the plan is empty.
#[derive(Default)]
pub(crate) struct ScriptedPoller {
    outcomes: Mutex<VecDeque<AttemptOutcome>>,
    calls: AtomicU32,
    delay: Duration,
}

impl ScriptedPoller {
    pub(crate) fn with_outcomes(outcomes: Vec<AttemptOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into_iter().collect()),
            ..Self::default()
        }
    }

    pub(crate) fn finalizing_after(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub(crate) fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl StatusPoller for ScriptedPoller {
    fn poll_once<'a>(&'a self, _task: &'a TransformStatusTask) -> BoxFuture<'a, AttemptOutcome> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.outcomes
                .lock()
                .expect("outcomes mutex poisoned")
                .pop_front()
                .unwrap_or(AttemptOutcome::Finalized(TransformVerdict::Promoted))
        })
    }
}
