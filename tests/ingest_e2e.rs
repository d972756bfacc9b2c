use axum::{
    body::Bytes,
    extract::{Path as AxumPath, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use dataset_ingest_lib::{
    artifact_store::{ArtifactKey, ArtifactStatus, ArtifactStore, ArtifactType, InMemoryArtifactStore},
    gateway::{build_rate_limiter, HttpIndexGateway, HttpTransformGateway},
    server::router,
    state::AppState,
    status_service::{
        DeadLetterReason, RetryPolicy, StatusService, StatusServiceConfig, StopStrategy,
        TransformStatusPoller,
    },
    store_service::{IngestRequest, StoreError, StoreService},
};
use nonzero_ext::nonzero;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const TRANSFORMED_METACARD: &[u8] = b"<metacard>transformed</metacard>";

/// Scripted behavior for the mock transform and index services.
struct MockUpstreamState {
    polls: Mutex<VecDeque<(u16, String)>>,
    default_poll: (u16, String),
    index_statuses: Mutex<VecDeque<u16>>,
    index_requests: Mutex<Vec<(String, Value)>>,
    transform_requests: Mutex<Vec<Value>>,
    discarded: Mutex<Vec<String>>,
    poll_count: AtomicU32,
}

impl MockUpstreamState {
    fn new(polls: Vec<(u16, String)>, default_poll: (u16, String), index_statuses: Vec<u16>) -> Self {
        Self {
            polls: Mutex::new(polls.into_iter().collect()),
            default_poll,
            index_statuses: Mutex::new(index_statuses.into_iter().collect()),
            index_requests: Mutex::new(Vec::new()),
            transform_requests: Mutex::new(Vec::new()),
            discarded: Mutex::new(Vec::new()),
            poll_count: AtomicU32::new(0),
        }
    }

    fn index_requests(&self) -> Vec<(String, Value)> {
        self.index_requests.lock().expect("index mutex poisoned").clone()
    }

    fn discarded(&self) -> Vec<String> {
        self.discarded.lock().expect("discarded mutex poisoned").clone()
    }

    fn poll_count(&self) -> u32 {
        self.poll_count.load(Ordering::SeqCst)
    }
}

/// In-process stand-in for both the transformation and the index service.
struct MockUpstream {
    base_url: String,
    state: Arc<MockUpstreamState>,
    task: JoinHandle<()>,
}

impl MockUpstream {
    async fn start(state: MockUpstreamState) -> Self {
        let state = Arc::new(state);
        let app = Router::new()
            .route("/transform", post(submit_handler))
            .route("/status/{id}", get(poll_handler).delete(discard_handler))
            .route("/out/{name}", get(artifact_handler))
            .route("/index/{id}", put(index_handler))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind mock upstream listener");
        let addr = listener
            .local_addr()
            .expect("mock upstream listener should have a local address");
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .await
                .expect("mock upstream axum server failed");
        });

        Self {
            base_url: format!("http://{addr}"),
            state,
            task,
        }
    }
}

impl Drop for MockUpstream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn submit_handler(
    State(state): State<Arc<MockUpstreamState>>,
    Json(body): Json<Value>,
) -> Response {
    let id = body["id"].as_str().unwrap_or_default().to_string();
    state
        .transform_requests
        .lock()
        .expect("transform mutex poisoned")
        .push(body);
    // Relative on purpose: the gateway resolves it against its base URL.
    (StatusCode::ACCEPTED, [(header::LOCATION, format!("status/{id}"))]).into_response()
}

async fn poll_handler(State(state): State<Arc<MockUpstreamState>>) -> Response {
    state.poll_count.fetch_add(1, Ordering::SeqCst);
    let (status, body) = state
        .polls
        .lock()
        .expect("polls mutex poisoned")
        .pop_front()
        .unwrap_or_else(|| state.default_poll.clone());
    let code = StatusCode::from_u16(status).expect("scripted status should be valid");
    (code, [(header::CONTENT_TYPE, "application/json")], body).into_response()
}

async fn discard_handler(
    AxumPath(id): AxumPath<String>,
    State(state): State<Arc<MockUpstreamState>>,
) -> StatusCode {
    state
        .discarded
        .lock()
        .expect("discarded mutex poisoned")
        .push(id);
    StatusCode::NO_CONTENT
}

async fn artifact_handler(AxumPath(name): AxumPath<String>) -> Response {
    match name.as_str() {
        "metacard" => (
            [(header::CONTENT_TYPE, "application/xml")],
            TRANSFORMED_METACARD,
        )
            .into_response(),
        "irm" => ([(header::CONTENT_TYPE, "application/json")], "{\"irm\":true}").into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn index_handler(
    AxumPath(id): AxumPath<String>,
    State(state): State<Arc<MockUpstreamState>>,
    Json(body): Json<Value>,
) -> StatusCode {
    state
        .index_requests
        .lock()
        .expect("index mutex poisoned")
        .push((id, body));
    let status = state
        .index_statuses
        .lock()
        .expect("index status mutex poisoned")
        .pop_front()
        .unwrap_or(200);
    StatusCode::from_u16(status).expect("scripted status should be valid")
}

fn poll_body(status: &str, metadata: Value) -> (u16, String) {
    (
        200,
        serde_json::json!({ "transformationStatus": status, "metadata": metadata }).to_string(),
    )
}

fn in_progress() -> (u16, String) {
    poll_body("IN_PROGRESS", serde_json::json!([]))
}

fn done_with_metacard() -> (u16, String) {
    poll_body(
        "DONE",
        serde_json::json!([{ "metadataType": "metacard", "location": "out/metacard" }]),
    )
}

/// The real gateways, store service and scheduler wired against a
/// [`MockUpstream`].
struct Harness {
    upstream: MockUpstream,
    store: Arc<InMemoryArtifactStore>,
    store_service: Arc<StoreService>,
    status_service: StatusService,
    cancel: CancellationToken,
    scheduler: Option<JoinHandle<()>>,
}

impl Harness {
    async fn start(upstream: MockUpstreamState, retry_policy: RetryPolicy) -> Self {
        let upstream = MockUpstream::start(upstream).await;
        let store = Arc::new(InMemoryArtifactStore::new());
        let transform = Arc::new(
            HttpTransformGateway::new(
                &upstream.base_url,
                Duration::from_secs(5),
                build_rate_limiter(nonzero!(1000u32)),
            )
            .expect("transform gateway"),
        );
        let index = Arc::new(
            HttpIndexGateway::new(&upstream.base_url, Duration::from_secs(5)).expect("index gateway"),
        );
        let status_service = StatusService::new(StatusServiceConfig {
            pool_size: 4,
            queue_capacity: 16,
            retry_policy,
            dead_letter_capacity: 16,
        });
        let store_service = Arc::new(StoreService::new(
            store.clone(),
            transform.clone(),
            index,
            status_service.queue(),
            "http://ingest.test",
        ));

        let cancel = CancellationToken::new();
        let poller = Arc::new(TransformStatusPoller::new(transform, store_service.clone()));
        let scheduler = status_service.start(poller, cancel.clone());

        Self {
            upstream,
            store,
            store_service,
            status_service,
            cancel,
            scheduler: Some(scheduler),
        }
    }

    async fn ingest(&self) -> String {
        self.store_service
            .ingest(IngestRequest {
                file_size: 12,
                mime_type: "text/plain".to_string(),
                file_content: Bytes::from_static(b"some-content"),
                file_name: Some("product.txt".to_string()),
                metacard_size: 11,
                metacard_content: Bytes::from_static(b"<metacard/>"),
            })
            .await
            .expect("ingest should succeed")
    }

    async fn status_of(&self, dataset_id: &str, artifact_type: ArtifactType) -> Option<ArtifactStatus> {
        self.store
            .get_status(&ArtifactKey::new(dataset_id, artifact_type))
            .await
            .ok()
    }

    async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.await.expect("scheduler task panicked");
        }
    }
}

fn zero_wait(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        wait_interval: Duration::ZERO,
        stop: StopStrategy::MaxAttempts(max_attempts),
    }
}

async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    let reached = tokio::time::timeout(Duration::from_secs(10), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "timed out waiting for {what}");
}

#[tokio::test]
async fn done_promotes_the_dataset_and_indexes_three_locations() {
    let harness = Harness::start(
        MockUpstreamState::new(vec![done_with_metacard()], in_progress(), vec![]),
        zero_wait(12),
    )
    .await;
    let upstream = harness.upstream.state.clone();

    let dataset_id = harness.ingest().await;
    eventually("index request", || upstream.index_requests().len() == 1).await;
    eventually("transform record cleanup", || upstream.discarded().len() == 1).await;

    let submitted = upstream
        .transform_requests
        .lock()
        .expect("transform mutex poisoned")
        .clone();
    assert_eq!(submitted.len(), 1);
    assert_eq!(
        submitted[0]["productLocation"],
        format!("http://ingest.test/datasets/{dataset_id}/file")
    );

    let metacard = harness
        .store_service
        .get_data(&dataset_id, ArtifactType::Metacard)
        .await
        .expect("metacard should be retrievable");
    assert_eq!(metacard.content, Bytes::from_static(TRANSFORMED_METACARD));
    assert_eq!(metacard.media_type, "application/xml");
    assert_eq!(
        harness.status_of(&dataset_id, ArtifactType::Metacard).await,
        Some(ArtifactStatus::Stored)
    );
    assert_eq!(
        harness.status_of(&dataset_id, ArtifactType::File).await,
        Some(ArtifactStatus::Stored)
    );

    let (indexed_id, body) = &upstream.index_requests()[0];
    assert_eq!(indexed_id, &dataset_id);
    for (field, artifact) in [
        ("fileLocation", "file"),
        ("irmLocation", "irm"),
        ("metacardLocation", "metacard"),
    ] {
        assert_eq!(
            body[field],
            format!("http://ingest.test/datasets/{dataset_id}/{artifact}")
        );
    }

    assert_eq!(upstream.discarded(), vec![dataset_id.clone()]);
    assert_eq!(harness.status_service.queue().len(), 0);
    assert!(harness.status_service.dead_letters().is_empty());
    harness.stop().await;
}

#[tokio::test]
async fn failed_transform_quarantines_every_artifact() {
    let failed = poll_body(
        "FAILED",
        serde_json::json!([{ "type": "irm", "location": "out/irm" }]),
    );
    let harness = Harness::start(
        MockUpstreamState::new(vec![failed], in_progress(), vec![]),
        zero_wait(12),
    )
    .await;
    let upstream = harness.upstream.state.clone();

    let dataset_id = harness.ingest().await;
    eventually("transform record cleanup", || upstream.discarded().len() == 1).await;

    for artifact_type in ArtifactType::ALL {
        assert!(matches!(
            harness.store_service.get_data(&dataset_id, artifact_type).await,
            Err(StoreError::NotFound { .. })
        ));
    }
    assert!(upstream.index_requests().is_empty());
    assert_eq!(harness.status_service.queue().len(), 0);
    harness.stop().await;
}

#[tokio::test]
async fn in_progress_polls_never_exceed_the_attempt_budget() {
    let harness = Harness::start(MockUpstreamState::new(vec![], in_progress(), vec![]), zero_wait(3)).await;
    let upstream = harness.upstream.state.clone();
    let dead_letters = harness.status_service.dead_letters();

    let dataset_id = harness.ingest().await;
    eventually("dead letter", || dead_letters.len() == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(upstream.poll_count(), 3);
    let record = &dead_letters.snapshot()[0];
    assert_eq!(record.dataset_id, dataset_id);
    assert_eq!(record.reason, DeadLetterReason::BudgetExhausted);
    assert_eq!(record.attempts, 3);
    assert_eq!(
        harness.status_of(&dataset_id, ArtifactType::File).await,
        Some(ArtifactStatus::Staged)
    );
    assert_eq!(harness.status_service.queue().len(), 0);
    harness.stop().await;
}

#[tokio::test]
async fn in_progress_requeues_after_a_wait_interval() {
    let policy = RetryPolicy {
        wait_interval: Duration::from_millis(300),
        stop: StopStrategy::MaxAttempts(12),
    };
    let harness = Harness::start(MockUpstreamState::new(vec![], in_progress(), vec![]), policy).await;
    let upstream = harness.upstream.state.clone();

    harness.ingest().await;
    eventually("first poll", || upstream.poll_count() == 1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The follow-up task waits out its interval before the next poll.
    assert_eq!(upstream.poll_count(), 1);
    eventually("second poll", || upstream.poll_count() == 2).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(upstream.poll_count(), 2);
    harness.stop().await;
}

#[tokio::test]
async fn vanished_transform_job_is_dropped_quietly() {
    let harness = Harness::start(
        MockUpstreamState::new(vec![(404, String::new())], in_progress(), vec![]),
        zero_wait(12),
    )
    .await;
    let upstream = harness.upstream.state.clone();

    let dataset_id = harness.ingest().await;
    eventually("first poll", || upstream.poll_count() == 1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(upstream.poll_count(), 1);
    assert!(upstream.index_requests().is_empty());
    assert!(upstream.discarded().is_empty());
    assert!(harness.status_service.dead_letters().is_empty());
    assert_eq!(
        harness.status_of(&dataset_id, ArtifactType::File).await,
        Some(ArtifactStatus::Staged)
    );
    harness.stop().await;
}

#[tokio::test]
async fn missing_transform_output_is_retried_and_never_promoted() {
    let done_missing = poll_body(
        "DONE",
        serde_json::json!([{ "metadataType": "metacard", "location": "out/missing" }]),
    );
    let harness = Harness::start(MockUpstreamState::new(vec![], done_missing, vec![]), zero_wait(3)).await;
    let upstream = harness.upstream.state.clone();
    let dead_letters = harness.status_service.dead_letters();

    let dataset_id = harness.ingest().await;
    eventually("dead letter", || dead_letters.len() == 1).await;

    assert_eq!(dead_letters.snapshot()[0].reason, DeadLetterReason::BudgetExhausted);
    assert_eq!(upstream.poll_count(), 3);
    assert!(upstream.index_requests().is_empty());
    assert!(upstream.discarded().is_empty());
    assert_eq!(
        harness.status_of(&dataset_id, ArtifactType::File).await,
        Some(ArtifactStatus::Staged)
    );
    let metacard = harness
        .store_service
        .get_data(&dataset_id, ArtifactType::Metacard)
        .await
        .expect("staged metacard stays retrievable");
    assert_eq!(metacard.content, Bytes::from_static(b"<metacard/>"));
    harness.stop().await;
}

#[tokio::test]
async fn malformed_index_request_stops_the_task() {
    let harness = Harness::start(
        MockUpstreamState::new(vec![], done_with_metacard(), vec![400]),
        zero_wait(12),
    )
    .await;
    let upstream = harness.upstream.state.clone();
    let dead_letters = harness.status_service.dead_letters();

    harness.ingest().await;
    eventually("dead letter", || dead_letters.len() == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(dead_letters.snapshot()[0].reason, DeadLetterReason::Rejected);
    assert_eq!(upstream.index_requests().len(), 1);
    assert_eq!(upstream.poll_count(), 1);
    assert!(upstream.discarded().is_empty());
    assert_eq!(harness.status_service.queue().len(), 0);
    harness.stop().await;
}

#[tokio::test]
async fn other_index_failures_retry_the_whole_task_once_per_cycle() {
    for status in [500u16, 401, 403, 501] {
        let harness = Harness::start(
            MockUpstreamState::new(vec![], done_with_metacard(), vec![status]),
            zero_wait(12),
        )
        .await;
        let upstream = harness.upstream.state.clone();

        harness.ingest().await;
        eventually("second index request", || upstream.index_requests().len() == 2).await;
        eventually("transform record cleanup", || upstream.discarded().len() == 1).await;

        assert_eq!(upstream.poll_count(), 2, "status {status} should re-poll once");
        assert!(harness.status_service.dead_letters().is_empty());
        assert_eq!(harness.status_service.queue().len(), 0);
        harness.stop().await;
    }
}

#[tokio::test]
async fn http_api_serves_ingest_retrieval_and_quarantine() {
    let policy = RetryPolicy {
        wait_interval: Duration::from_secs(5),
        stop: StopStrategy::MaxAttempts(12),
    };
    let harness = Harness::start(MockUpstreamState::new(vec![], in_progress(), vec![]), policy).await;
    let cancel = CancellationToken::new();
    let state = Arc::new(AppState::new(
        harness.store_service.clone(),
        harness.status_service.dead_letters(),
        cancel.clone(),
        1024 * 1024,
    ));
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind API listener");
    let addr = listener.local_addr().expect("API listener address");
    let api = tokio::spawn(async move {
        axum::serve(listener, router(state))
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
            .expect("API server failed");
    });
    let base = format!("http://{addr}");
    let client = reqwest::Client::new();

    let form = reqwest::multipart::Form::new()
        .part(
            "file",
            reqwest::multipart::Part::bytes(b"some-content".to_vec())
                .file_name("product.txt")
                .mime_str("text/plain")
                .expect("valid mime"),
        )
        .part(
            "metacard",
            reqwest::multipart::Part::bytes(b"<metacard/>".to_vec()).file_name("metacard.xml"),
        );
    let response = client
        .post(format!("{base}/datasets"))
        .multipart(form)
        .send()
        .await
        .expect("ingest request");
    assert_eq!(response.status(), reqwest::StatusCode::CREATED);
    let body: Value = response.json().await.expect("ingest body");
    let dataset_id = body["id"].as_str().expect("id field").to_string();

    let response = client
        .get(format!("{base}/datasets/{dataset_id}/file"))
        .send()
        .await
        .expect("get file");
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let headers: HeaderMap = response.headers().clone();
    assert_eq!(headers[header::CONTENT_TYPE], "text/plain");
    assert_eq!(
        headers[header::CONTENT_DISPOSITION],
        "attachment; filename=\"product.txt\""
    );
    assert_eq!(response.bytes().await.expect("file body").as_ref(), b"some-content");

    let response = client
        .get(format!("{base}/datasets/{dataset_id}/thumbnail"))
        .send()
        .await
        .expect("get unknown artifact");
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

    let missing_part = reqwest::multipart::Form::new().part(
        "file",
        reqwest::multipart::Part::bytes(b"x".to_vec()).file_name("x.bin"),
    );
    let response = client
        .post(format!("{base}/datasets"))
        .multipart(missing_part)
        .send()
        .await
        .expect("ingest without metacard");
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

    let response = client
        .delete(format!("{base}/datasets/{dataset_id}"))
        .send()
        .await
        .expect("quarantine");
    assert_eq!(response.status(), reqwest::StatusCode::NO_CONTENT);

    let response = client
        .get(format!("{base}/datasets/{dataset_id}/file"))
        .send()
        .await
        .expect("get after quarantine");
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

    let response = client
        .get(format!("{base}/dead-letters"))
        .send()
        .await
        .expect("dead letters");
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let letters: Value = response.json().await.expect("dead letter body");
    assert_eq!(letters, serde_json::json!([]));

    let response = client
        .get(format!("{base}/health"))
        .send()
        .await
        .expect("health");
    assert_eq!(response.text().await.expect("health body"), "Healthy");

    api.abort();
    harness.stop().await;
}
