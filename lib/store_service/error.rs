use thiserror::Error;

use crate::artifact_store::{ArtifactStoreError, ArtifactType};
use crate::gateway::GatewayError;
use crate::queue::QueueError;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("dataset {dataset_id} has no retrievable {artifact_type} artifact")]
    NotFound {
        dataset_id: String,
        artifact_type: ArtifactType,
    },

    #[error(transparent)]
    Storage(#[from] ArtifactStoreError),

    #[error("transform submission failed: {0}")]
    Submission(#[from] GatewayError),

    #[error("could not enqueue transform status task: {0}")]
    Queue(#[from] QueueError),
}

impl StoreError {
    /// True when the caller sent something unusable.
    pub fn is_invalid_request(&self) -> bool {
        matches!(self, Self::Storage(err) if err.is_invalid_request())
    }
}
