use std::collections::HashMap;

use futures::future::BoxFuture;
use tokio::sync::RwLock;

use super::{
    ArtifactKey, ArtifactStatus, ArtifactStore, ArtifactStoreError, ArtifactUpload, StoredArtifact,
};

/// Process-local store used when no `STORAGE_DIR` is configured, and by tests.
#[derive(Default)]
pub struct InMemoryArtifactStore {
    artifacts: RwLock<HashMap<ArtifactKey, StoredArtifact>>,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.artifacts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.artifacts.read().await.is_empty()
    }
}

impl ArtifactStore for InMemoryArtifactStore {
    fn store<'a>(
        &'a self,
        key: &'a ArtifactKey,
        upload: ArtifactUpload,
    ) -> BoxFuture<'a, Result<(), ArtifactStoreError>> {
        Box::pin(async move {
            upload.validate_size()?;
            let artifact = StoredArtifact {
                media_type: upload.media_type,
                content: upload.content,
                metadata: upload.metadata,
            };
            self.artifacts.write().await.insert(key.clone(), artifact);
            Ok(())
        })
    }

    fn retrieve<'a>(
        &'a self,
        key: &'a ArtifactKey,
    ) -> BoxFuture<'a, Result<StoredArtifact, ArtifactStoreError>> {
        Box::pin(async move {
            self.artifacts
                .read()
                .await
                .get(key)
                .cloned()
                .ok_or_else(|| ArtifactStoreError::NotFound(key.clone()))
        })
    }

    fn delete<'a>(&'a self, key: &'a ArtifactKey) -> BoxFuture<'a, Result<(), ArtifactStoreError>> {
        Box::pin(async move {
            self.artifacts.write().await.remove(key);
            Ok(())
        })
    }

    fn update_status<'a>(
        &'a self,
        key: &'a ArtifactKey,
        status: ArtifactStatus,
    ) -> BoxFuture<'a, Result<(), ArtifactStoreError>> {
        Box::pin(async move {
            let mut artifacts = self.artifacts.write().await;
            let artifact = artifacts
                .get_mut(key)
                .ok_or_else(|| ArtifactStoreError::NotFound(key.clone()))?;
            artifact.metadata.status = status;
            Ok(())
        })
    }

    fn get_status<'a>(
        &'a self,
        key: &'a ArtifactKey,
    ) -> BoxFuture<'a, Result<ArtifactStatus, ArtifactStoreError>> {
        Box::pin(async move {
            self.artifacts
                .read()
                .await
                .get(key)
                .map(|artifact| artifact.metadata.status)
                .ok_or_else(|| ArtifactStoreError::NotFound(key.clone()))
        })
    }
}
