use std::sync::Arc;

use prometheus_client::registry::Registry;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::status_service::DeadLetterLog;
use crate::store_service::StoreService;

pub struct AppState {
    pub store_service: Arc<StoreService>,
    pub dead_letters: Arc<DeadLetterLog>,
    pub shutdown_token: CancellationToken,
    pub registry: RwLock<Registry>,
    /// Body limit applied to `POST /datasets`.
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(
        store_service: Arc<StoreService>,
        dead_letters: Arc<DeadLetterLog>,
        shutdown_token: CancellationToken,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            store_service,
            dead_letters,
            shutdown_token,
            registry: RwLock::new(<Registry>::default()),
            max_upload_bytes,
        }
    }
}
