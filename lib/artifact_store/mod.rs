mod fs;
mod memory;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use fs::FsArtifactStore;
pub use memory::InMemoryArtifactStore;

/// The three blobs every dataset can own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactType {
    File,
    Irm,
    Metacard,
}

impl ArtifactType {
    pub const ALL: [ArtifactType; 3] = [Self::File, Self::Irm, Self::Metacard];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Irm => "irm",
            Self::Metacard => "metacard",
        }
    }
}

impl fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactType {
    type Err = ArtifactStoreError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(Self::File),
            "irm" => Ok(Self::Irm),
            "metacard" => Ok(Self::Metacard),
            other => Err(ArtifactStoreError::UnknownArtifactType(other.to_string())),
        }
    }
}

/// Lifecycle tag attached to each stored artifact.
///
/// `Quarantined` is represented by absence in both store implementations; the
/// variant exists so a tag read back from a foreign store can still be refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactStatus {
    Quarantined,
    Staged,
    Stored,
}

impl ArtifactStatus {
    pub fn is_retrievable(self) -> bool {
        matches!(self, Self::Staged | Self::Stored)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactKey {
    pub dataset_id: String,
    pub artifact_type: ArtifactType,
}

impl ArtifactKey {
    pub fn new(dataset_id: impl Into<String>, artifact_type: ArtifactType) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            artifact_type,
        }
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.dataset_id, self.artifact_type)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub file_name: Option<String>,
    pub status: ArtifactStatus,
}

/// Write request for one artifact. `size` is the caller-declared length and is
/// checked against `content`.
#[derive(Debug, Clone)]
pub struct ArtifactUpload {
    pub size: u64,
    pub media_type: String,
    pub content: Bytes,
    pub metadata: ArtifactMetadata,
}

impl ArtifactUpload {
    pub fn validate_size(&self) -> Result<(), ArtifactStoreError> {
        let actual = self.content.len() as u64;
        if actual != self.size {
            return Err(ArtifactStoreError::SizeMismatch {
                declared: self.size,
                actual,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    pub media_type: String,
    pub content: Bytes,
    pub metadata: ArtifactMetadata,
}

#[derive(Error, Debug)]
pub enum ArtifactStoreError {
    #[error("artifact {0} not found")]
    NotFound(ArtifactKey),

    #[error("declared size {declared} does not match received {actual} bytes")]
    SizeMismatch { declared: u64, actual: u64 },

    #[error("invalid dataset id: {0:?}")]
    InvalidDatasetId(String),

    #[error("unknown artifact type: {0:?}")]
    UnknownArtifactType(String),

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt artifact sidecar: {0}")]
    Sidecar(#[from] serde_json::Error),
}

impl ArtifactStoreError {
    /// True when the request itself is malformed and repeating it cannot succeed.
    pub fn is_invalid_request(&self) -> bool {
        matches!(
            self,
            Self::SizeMismatch { .. } | Self::InvalidDatasetId(_) | Self::UnknownArtifactType(_)
        )
    }
}

/// Blob store keyed by `(dataset id, artifact type)` with a status tag per artifact.
///
/// `delete` is idempotent; every other read of an absent artifact yields
/// `ArtifactStoreError::NotFound`.
pub trait ArtifactStore: Send + Sync {
    fn store<'a>(
        &'a self,
        key: &'a ArtifactKey,
        upload: ArtifactUpload,
    ) -> BoxFuture<'a, Result<(), ArtifactStoreError>>;

    fn retrieve<'a>(
        &'a self,
        key: &'a ArtifactKey,
    ) -> BoxFuture<'a, Result<StoredArtifact, ArtifactStoreError>>;

    fn delete<'a>(&'a self, key: &'a ArtifactKey) -> BoxFuture<'a, Result<(), ArtifactStoreError>>;

    fn update_status<'a>(
        &'a self,
        key: &'a ArtifactKey,
        status: ArtifactStatus,
    ) -> BoxFuture<'a, Result<(), ArtifactStoreError>>;

    fn get_status<'a>(
        &'a self,
        key: &'a ArtifactKey,
    ) -> BoxFuture<'a, Result<ArtifactStatus, ArtifactStoreError>>;
}

impl<T> ArtifactStore for Arc<T>
where
    T: ArtifactStore + ?Sized,
{
    fn store<'a>(
        &'a self,
        key: &'a ArtifactKey,
        upload: ArtifactUpload,
    ) -> BoxFuture<'a, Result<(), ArtifactStoreError>> {
        (**self).store(key, upload)
    }

    fn retrieve<'a>(
        &'a self,
        key: &'a ArtifactKey,
    ) -> BoxFuture<'a, Result<StoredArtifact, ArtifactStoreError>> {
        (**self).retrieve(key)
    }

    fn delete<'a>(&'a self, key: &'a ArtifactKey) -> BoxFuture<'a, Result<(), ArtifactStoreError>> {
        (**self).delete(key)
    }

    fn update_status<'a>(
        &'a self,
        key: &'a ArtifactKey,
        status: ArtifactStatus,
    ) -> BoxFuture<'a, Result<(), ArtifactStoreError>> {
        (**self).update_status(key, status)
    }

    fn get_status<'a>(
        &'a self,
        key: &'a ArtifactKey,
    ) -> BoxFuture<'a, Result<ArtifactStatus, ArtifactStoreError>> {
        (**self).get_status(key)
    }
}
