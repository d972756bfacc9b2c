pub mod datasets;
pub mod monitoring;

use crate::state::AppState;
use prometheus_client::encoding::text::encode;

use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::{
    extract::State,
    routing::{delete, get, post},
    Router,
};
use monitoring::{INGEST_METRICS, POLLER_METRICS};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

async fn health_handler() -> String {
    "Healthy".to_string()
}

async fn expose_metrics(state: State<Arc<AppState>>) -> Result<String, StatusCode> {
    let mut buffer = String::new();
    let registry = state.registry.read().await;
    encode(&mut buffer, &registry).map_err(|err| {
        error!(event = "metrics_encode_failed", error = %err, "could not encode metrics");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(buffer)
}

/// Registers this process's metric families in `state.registry`.
///
/// The `ingest` and `poller` families are process-wide and land only in the
/// registry of the first call; later calls, even with a different
/// `AppState`, add just `service_build_info`.
pub async fn register_metrics(state: &AppState) {
    let mut registry = state.registry.write().await;

    INGEST_METRICS
        .get_or_init(|| async { monitoring::IngestMetrics::register(&mut registry, "ingest") })
        .await;

    POLLER_METRICS
        .get_or_init(|| async { monitoring::PollerMetrics::register(&mut registry, "poller") })
        .await;

    monitoring::register_build_info_metric(&mut registry, "service");
}

pub fn router(state: Arc<AppState>) -> Router {
    let upload_limit = state.max_upload_bytes;
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(expose_metrics))
        .route(
            "/datasets",
            post(datasets::ingest_dataset).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route(
            "/datasets/{id}/{artifact}",
            get(datasets::get_artifact),
        )
        .route("/datasets/{id}", delete(datasets::quarantine_dataset))
        .route("/dead-letters", get(datasets::list_dead_letters))
        .with_state(state)
}

/// Binds `addr`, registers metrics and serves the API until the shutdown
/// token fires.
pub async fn setup_server_with_addr(
    state: Arc<AppState>,
    addr: SocketAddr,
) -> Result<tokio::task::JoinHandle<()>, std::io::Error> {
    register_metrics(&state).await;

    let shutdown_token = state.shutdown_token.clone();
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(
        event = "http_server_listening",
        addr = %listener.local_addr()?,
        "serving HTTP API"
    );
    let server_handle = tokio::spawn(async move {
        let served = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            shutdown_token.cancelled().await;
        })
        .await;
        if let Err(err) = served {
            error!(event = "http_server_failed", error = %err, "HTTP server exited with an error");
        }
    });

    Ok(server_handle)
}
