pub mod error;


use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use tracing::{info, warn};
use uuid::Uuid;

pub use error::StoreError;

use crate::artifact_store::{
    ArtifactKey, ArtifactMetadata, ArtifactStatus, ArtifactStore, ArtifactStoreError,
    ArtifactType, ArtifactUpload,
};
use crate::gateway::{
    CallOutcome, GatewayError, IndexGateway, IndexRequest, MetadataArtifact, TransformGateway, TransformRequest,
};
use crate::queue::{TaskQueue, TransformStatusTask};
use crate::server::monitoring::INGEST_METRICS;
use crate::status_service::DatasetLifecycle;

pub const METACARD_MEDIA_TYPE: &str = "application/xml";

/// Everything needed to stage one dataset. Sizes are the caller-declared
/// byte counts and must match the content.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub file_size: u64,
    pub mime_type: String,
    pub file_content: Bytes,
    pub file_name: Option<String>,
    pub metacard_size: u64,
    pub metacard_content: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetData {
    pub media_type: String,
    pub content: Bytes,
    pub file_name: Option<String>,
}

/// Drives a dataset through staging, transform submission, promotion and
/// quarantine.
pub struct StoreService {
    store: Arc<dyn ArtifactStore>,
    transform: Arc<dyn TransformGateway>,
    index: Arc<dyn IndexGateway>,
    queue: Arc<TaskQueue>,
    public_base_url: String,
}

impl StoreService {
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        transform: Arc<dyn TransformGateway>,
        index: Arc<dyn IndexGateway>,
        queue: Arc<TaskQueue>,
        public_base_url: &str,
    ) -> Self {
        Self {
            store,
            transform,
            index,
            queue,
            public_base_url: public_base_url.trim().trim_end_matches('/').to_string(),
        }
    }

    /// Externally resolvable URL the transform and index services use to
    /// read an artifact back.
    pub fn artifact_url(&self, dataset_id: &str, artifact_type: ArtifactType) -> String {
        format!(
            "{}/datasets/{}/{}",
            self.public_base_url, dataset_id, artifact_type
        )
    }

    /// Stages the file and metacard, submits the transform and queues its
    /// status task. Nothing is retried; staged artifacts are left in place
    /// when a later step fails.
    pub async fn ingest(&self, request: IngestRequest) -> Result<String, StoreError> {
        let dataset_id = Uuid::new_v4().simple().to_string();
        match self.stage_and_submit(&dataset_id, request).await {
            Ok(()) => {
                if let Some(metrics) = INGEST_METRICS.get() {
                    metrics.datasets_ingested_total.inc();
                }
                Ok(dataset_id)
            }
            Err(err) => {
                warn!(
                    event = "dataset_ingest_failed",
                    dataset_id = %dataset_id,
                    error = %err,
                    "dataset ingestion aborted"
                );
                if let Some(metrics) = INGEST_METRICS.get() {
                    metrics.datasets_failed_total.inc();
                }
                Err(err)
            }
        }
    }

    async fn stage_and_submit(
        &self,
        dataset_id: &str,
        request: IngestRequest,
    ) -> Result<(), StoreError> {
        let file_key = ArtifactKey::new(dataset_id, ArtifactType::File);
        self.store
            .store(
                &file_key,
                ArtifactUpload {
                    size: request.file_size,
                    media_type: request.mime_type,
                    content: request.file_content,
                    metadata: ArtifactMetadata {
                        file_name: request.file_name,
                        status: ArtifactStatus::Staged,
                    },
                },
            )
            .await?;

        let metacard_key = ArtifactKey::new(dataset_id, ArtifactType::Metacard);
        self.store
            .store(
                &metacard_key,
                ArtifactUpload {
                    size: request.metacard_size,
                    media_type: METACARD_MEDIA_TYPE.to_string(),
                    content: request.metacard_content,
                    metadata: ArtifactMetadata {
                        file_name: None,
                        status: ArtifactStatus::Staged,
                    },
                },
            )
            .await?;

        let transform_request = TransformRequest {
            id: dataset_id.to_string(),
            product_location: self.artifact_url(dataset_id, ArtifactType::File),
            metacard_location: self.artifact_url(dataset_id, ArtifactType::Metacard),
        };
        let status_url = self.transform.submit(&transform_request).await?;

        self.queue
            .enqueue(TransformStatusTask::new(dataset_id, status_url.clone()))
            .await?;

        info!(
            event = "dataset_staged",
            dataset_id = %dataset_id,
            transform_status_url = %status_url,
            "dataset staged and transform submitted"
        );
        Ok(())
    }

    /// Deletes every artifact of the dataset. Idempotent.
    pub async fn quarantine(&self, dataset_id: &str) -> Result<(), StoreError> {
        for artifact_type in ArtifactType::ALL {
            self.store
                .delete(&ArtifactKey::new(dataset_id, artifact_type))
                .await?;
        }

        info!(
            event = "dataset_quarantined",
            dataset_id = %dataset_id,
            "dataset artifacts removed"
        );
        if let Some(metrics) = INGEST_METRICS.get() {
            metrics.datasets_quarantined_total.inc();
        }
        Ok(())
    }

    /// Reads one artifact; only `staged` or `stored` artifacts are visible.
    pub async fn get_data(
        &self,
        dataset_id: &str,
        artifact_type: ArtifactType,
    ) -> Result<DatasetData, StoreError> {
        let not_found = || StoreError::NotFound {
            dataset_id: dataset_id.to_string(),
            artifact_type,
        };

        let artifact = match self
            .store
            .retrieve(&ArtifactKey::new(dataset_id, artifact_type))
            .await
        {
            Ok(artifact) => artifact,
            Err(ArtifactStoreError::NotFound(_)) => return Err(not_found()),
            Err(err) => return Err(err.into()),
        };

        if !artifact.metadata.status.is_retrievable() {
            return Err(not_found());
        }

        Ok(DatasetData {
            media_type: artifact.media_type,
            content: artifact.content,
            file_name: artifact.metadata.file_name,
        })
    }

    /// Stores the transform's metadata artifacts as `stored`, promotes the
    /// file and asks the index service to finalize the dataset.
    pub async fn add_metadata(
        &self,
        dataset_id: &str,
        metadata: &[MetadataArtifact],
    ) -> CallOutcome {
        let file_key = ArtifactKey::new(dataset_id, ArtifactType::File);
        if let Err(err) = self.store.get_status(&file_key).await {
            return store_outcome(&err);
        }

        let mut metacard_replaced = false;
        for artifact in metadata {
            let artifact_type = match artifact.metadata_type.parse::<ArtifactType>() {
                Ok(ArtifactType::File) => {
                    warn!(
                        event = "metadata_artifact_skipped",
                        dataset_id = %dataset_id,
                        metadata_type = %artifact.metadata_type,
                        "transform output may not overwrite the file artifact"
                    );
                    continue;
                }
                Ok(artifact_type) => artifact_type,
                Err(_) => {
                    warn!(
                        event = "metadata_artifact_skipped",
                        dataset_id = %dataset_id,
                        metadata_type = %artifact.metadata_type,
                        "unknown metadata artifact type"
                    );
                    continue;
                }
            };

            let fetched = match self.transform.fetch_artifact(&artifact.location).await {
                Ok(fetched) => fetched,
                Err(err) => return fetch_outcome(&err),
            };

            let key = ArtifactKey::new(dataset_id, artifact_type);
            if artifact_type == ArtifactType::Metacard {
                if let Err(err) = self.store.delete(&key).await {
                    return store_outcome(&err);
                }
                metacard_replaced = true;
            }

            let upload = ArtifactUpload {
                size: fetched.content.len() as u64,
                media_type: fetched.media_type,
                content: fetched.content,
                metadata: ArtifactMetadata {
                    file_name: None,
                    status: ArtifactStatus::Stored,
                },
            };
            if let Err(err) = self.store.store(&key, upload).await {
                return store_outcome(&err);
            }
        }

        if !metacard_replaced {
            let metacard_key = ArtifactKey::new(dataset_id, ArtifactType::Metacard);
            match self
                .store
                .update_status(&metacard_key, ArtifactStatus::Stored)
                .await
            {
                Ok(()) | Err(ArtifactStoreError::NotFound(_)) => {}
                Err(err) => return store_outcome(&err),
            }
        }

        if let Err(err) = self
            .store
            .update_status(&file_key, ArtifactStatus::Stored)
            .await
        {
            return store_outcome(&err);
        }

        let request = IndexRequest {
            file_location: self.artifact_url(dataset_id, ArtifactType::File),
            irm_location: self.artifact_url(dataset_id, ArtifactType::Irm),
            metacard_location: self.artifact_url(dataset_id, ArtifactType::Metacard),
        };
        let outcome = self.index.index(dataset_id, &request).await;
        if outcome == CallOutcome::Success {
            info!(
                event = "dataset_promoted",
                dataset_id = %dataset_id,
                "dataset artifacts stored and indexed"
            );
            if let Some(metrics) = INGEST_METRICS.get() {
                metrics.datasets_promoted_total.inc();
            }
        }
        outcome
    }
}

impl DatasetLifecycle for StoreService {
    fn on_transform_done<'a>(
        &'a self,
        dataset_id: &'a str,
        metadata: &'a [MetadataArtifact],
    ) -> BoxFuture<'a, CallOutcome> {
        Box::pin(self.add_metadata(dataset_id, metadata))
    }

    fn on_transform_failed<'a>(&'a self, dataset_id: &'a str) -> BoxFuture<'a, CallOutcome> {
        Box::pin(async move {
            match self.quarantine(dataset_id).await {
                Ok(()) => CallOutcome::Success,
                Err(StoreError::Storage(err)) => store_outcome(&err),
                Err(err) => CallOutcome::Transient(err.to_string()),
            }
        })
    }
}

fn store_outcome(error: &ArtifactStoreError) -> CallOutcome {
    match error {
        ArtifactStoreError::NotFound(_) => CallOutcome::NotFound,
        err if err.is_invalid_request() => CallOutcome::BadRequest(err.to_string()),
        err => CallOutcome::Transient(err.to_string()),
    }
}

/// A transform output that cannot be fetched leaves nothing to promote, so
/// its 404 is retried instead of settling the task.
fn fetch_outcome(error: &GatewayError) -> CallOutcome {
    match CallOutcome::from_gateway_error(error) {
        CallOutcome::NotFound => CallOutcome::Transient(error.to_string()),
        outcome => outcome,
    }
}
