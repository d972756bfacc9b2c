use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::debug;

use super::{
    ArtifactKey, ArtifactMetadata, ArtifactStatus, ArtifactStore, ArtifactStoreError,
    ArtifactUpload, StoredArtifact,
};

/// Filesystem-backed store.
///
/// Layout: `{root}/{dataset_id}/{artifact}.bin` holds the bytes and
/// `{root}/{dataset_id}/{artifact}.json` holds media type, file name and status.
/// The sidecar is written last and removed first, so its presence is what makes
/// an artifact exist.
pub struct FsArtifactStore {
    root: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct Sidecar {
    media_type: String,
    #[serde(flatten)]
    metadata: ArtifactMetadata,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dataset_dir(&self, dataset_id: &str) -> Result<PathBuf, ArtifactStoreError> {
        validate_dataset_id(dataset_id)?;
        Ok(self.root.join(dataset_id))
    }

    fn paths(&self, key: &ArtifactKey) -> Result<(PathBuf, PathBuf), ArtifactStoreError> {
        let dir = self.dataset_dir(&key.dataset_id)?;
        let name = key.artifact_type.as_str();
        Ok((
            dir.join(format!("{name}.bin")),
            dir.join(format!("{name}.json")),
        ))
    }

    async fn read_sidecar(
        &self,
        key: &ArtifactKey,
        sidecar_path: &Path,
    ) -> Result<Sidecar, ArtifactStoreError> {
        match fs::read(sidecar_path).await {
            Ok(raw) => Ok(serde_json::from_slice(&raw)?),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(ArtifactStoreError::NotFound(key.clone()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn write_sidecar(path: &Path, sidecar: &Sidecar) -> Result<(), ArtifactStoreError> {
        let encoded = serde_json::to_vec(sidecar)?;
        write_atomically(path, &encoded).await
    }
}

impl ArtifactStore for FsArtifactStore {
    fn store<'a>(
        &'a self,
        key: &'a ArtifactKey,
        upload: ArtifactUpload,
    ) -> BoxFuture<'a, Result<(), ArtifactStoreError>> {
        Box::pin(async move {
            upload.validate_size()?;
            let (content_path, sidecar_path) = self.paths(key)?;
            if let Some(parent) = content_path.parent() {
                fs::create_dir_all(parent).await?;
            }

            write_atomically(&content_path, &upload.content).await?;
            Self::write_sidecar(
                &sidecar_path,
                &Sidecar {
                    media_type: upload.media_type,
                    metadata: upload.metadata,
                },
            )
            .await?;

            debug!(
                event = "artifact_written",
                artifact = %key,
                bytes = upload.size,
                "wrote artifact to filesystem store"
            );
            Ok(())
        })
    }

    fn retrieve<'a>(
        &'a self,
        key: &'a ArtifactKey,
    ) -> BoxFuture<'a, Result<StoredArtifact, ArtifactStoreError>> {
        Box::pin(async move {
            let (content_path, sidecar_path) = self.paths(key)?;
            let sidecar = self.read_sidecar(key, &sidecar_path).await?;
            let content = match fs::read(&content_path).await {
                Ok(content) => content,
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    return Err(ArtifactStoreError::NotFound(key.clone()))
                }
                Err(err) => return Err(err.into()),
            };

            Ok(StoredArtifact {
                media_type: sidecar.media_type,
                content: Bytes::from(content),
                metadata: sidecar.metadata,
            })
        })
    }

    fn delete<'a>(&'a self, key: &'a ArtifactKey) -> BoxFuture<'a, Result<(), ArtifactStoreError>> {
        Box::pin(async move {
            let (content_path, sidecar_path) = self.paths(key)?;
            remove_if_present(&sidecar_path).await?;
            remove_if_present(&content_path).await?;

            // Only succeeds once the last artifact of the dataset is gone.
            if let Some(dir) = content_path.parent() {
                let _ = fs::remove_dir(dir).await;
            }
            Ok(())
        })
    }

    fn update_status<'a>(
        &'a self,
        key: &'a ArtifactKey,
        status: ArtifactStatus,
    ) -> BoxFuture<'a, Result<(), ArtifactStoreError>> {
        Box::pin(async move {
            let (_, sidecar_path) = self.paths(key)?;
            let mut sidecar = self.read_sidecar(key, &sidecar_path).await?;
            sidecar.metadata.status = status;
            Self::write_sidecar(&sidecar_path, &sidecar).await
        })
    }

    fn get_status<'a>(
        &'a self,
        key: &'a ArtifactKey,
    ) -> BoxFuture<'a, Result<ArtifactStatus, ArtifactStoreError>> {
        Box::pin(async move {
            let (_, sidecar_path) = self.paths(key)?;
            Ok(self.read_sidecar(key, &sidecar_path).await?.metadata.status)
        })
    }
}

fn validate_dataset_id(dataset_id: &str) -> Result<(), ArtifactStoreError> {
    let valid = !dataset_id.is_empty()
        && dataset_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ArtifactStoreError::InvalidDatasetId(dataset_id.to_string()))
    }
}

async fn write_atomically(path: &Path, data: &[u8]) -> Result<(), ArtifactStoreError> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = path.with_file_name(format!("{file_name}.part"));
    fs::write(&tmp_path, data).await?;
    fs::rename(&tmp_path, path).await?;
    Ok(())
}

async fn remove_if_present(path: &Path) -> Result<(), ArtifactStoreError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}
