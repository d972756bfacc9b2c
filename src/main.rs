use dataset_ingest_lib::{
    artifact_store::{ArtifactStore, FsArtifactStore, InMemoryArtifactStore},
    cli::parse_args,
    config::Config,
    gateway::{build_rate_limiter, HttpIndexGateway, HttpTransformGateway},
    logging::{format_error_report, init_logging},
    server::setup_server_with_addr,
    state::AppState,
    status_service::{StatusService, TransformStatusPoller},
    store_service::StoreService,
};
use std::error::Error;
use std::sync::Arc;

use dotenv::dotenv;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Cancels `shutdown_token` when SIGTERM or SIGINT is received.
async fn handle_shutdown_signals(shutdown_token: CancellationToken) {
    let (mut sigterm, mut sigint) =
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
            (Err(err), _) | (_, Err(err)) => {
                error!(
                    event = "signal_handler_failed",
                    error = %err,
                    "could not register signal handlers; shutting down"
                );
                shutdown_token.cancel();
                return;
            }
        };

    tokio::select! {
        _ = sigterm.recv() => {
            info!(event = "shutdown_signal", signal = "SIGTERM", "SIGTERM received, shutting down.");
        }
        _ = sigint.recv() => {
            info!(event = "shutdown_signal", signal = "SIGINT", "SIGINT received, shutting down.");
        }
        _ = shutdown_token.cancelled() => {}
    }

    shutdown_token.cancel();
}

async fn run(config: Config) -> Result<(), Box<dyn Error + Send + Sync>> {
    let store: Arc<dyn ArtifactStore> = match &config.storage_dir {
        Some(dir) => {
            info!(
                event = "artifact_store_selected",
                backend = "filesystem",
                root = %dir.display(),
                "using filesystem artifact store"
            );
            Arc::new(FsArtifactStore::new(dir))
        }
        None => {
            warn!(
                event = "artifact_store_selected",
                backend = "memory",
                "STORAGE_DIR unset; artifacts are kept in memory and lost on restart"
            );
            Arc::new(InMemoryArtifactStore::new())
        }
    };

    let transform = Arc::new(HttpTransformGateway::new(
        &config.transform_api_url,
        config.http_timeout,
        build_rate_limiter(config.poll_rate_per_second),
    )?);
    let index = Arc::new(HttpIndexGateway::new(
        &config.index_api_url,
        config.http_timeout,
    )?);

    let status_service = StatusService::new(config.status_service_config());
    let queue = status_service.queue();
    let store_service = Arc::new(StoreService::new(
        store,
        transform.clone(),
        index,
        queue.clone(),
        &config.public_base_url,
    ));

    let shutdown_token = CancellationToken::new();
    let state = Arc::new(AppState::new(
        store_service.clone(),
        status_service.dead_letters(),
        shutdown_token.clone(),
        config.max_upload_bytes,
    ));
    let shutdown_handle = tokio::spawn(handle_shutdown_signals(shutdown_token.clone()));

    let server_handle = setup_server_with_addr(state, config.listen_addr).await?;

    let poller = Arc::new(TransformStatusPoller::new(transform, store_service));
    let scheduler_handle = status_service.start(poller, shutdown_token.clone());

    shutdown_handle.await?;
    scheduler_handle.await?;
    server_handle.await?;

    info!(
        event = "shutdown_complete",
        dropped_tasks = queue.len(),
        "dataset ingest service stopped"
    );
    Ok(())
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    let args = parse_args();
    let _logging = init_logging("dataset_ingest", "serve", "info");

    let config = match Config::from_env() {
        Ok(config) => config.with_cli_overrides(&args),
        Err(err) => {
            error!(
                event = "config_invalid",
                report = %format_error_report(&err),
                "configuration incorrectly specified"
            );
            std::process::exit(1);
        }
    };

    if let Err(err) = run(config).await {
        error!(
            event = "service_failed",
            report = %format_error_report(err.as_ref()),
            "dataset ingest service failed"
        );
        std::process::exit(1);
    }
}
