//! Artifact storage for generated code and run reports.
//!
//! Each stored artifact gets an opaque `artifact-<uuid>` id and a SHA-256
//! checksum that is verified again on retrieval.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::StorageError;
use crate::language::file_extension;

/// What an artifact holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Code,
    TestResult,
    Analysis,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Code => "code",
            ArtifactKind::TestResult => "test_result",
            ArtifactKind::Analysis => "analysis",
        }
    }

    /// Code keeps its language's extension; reports are JSON.
    fn extension(&self, language: &str) -> &'static str {
        match self {
            ArtifactKind::Code => file_extension(language),
            ArtifactKind::TestResult | ArtifactKind::Analysis => "json",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata about a stored artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredArtifact {
    /// Opaque identifier (`artifact-<uuid>`).
    pub id: String,
    /// Where the store put the content (a path or a `memory://` URI).
    pub location: String,
    pub kind: ArtifactKind,
    pub language: String,
    /// Content size in bytes.
    pub size: u64,
    /// SHA-256 hex digest of the content.
    pub checksum: String,
    pub created_at: DateTime<Utc>,
}

/// Persists final run outputs.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Stores `content` and returns its metadata.
    async fn store_artifact(
        &self,
        content: &str,
        kind: ArtifactKind,
        language: &str,
    ) -> Result<StoredArtifact, StorageError>;

    /// Reads an artifact back, verifying its checksum.
    async fn retrieve(&self, artifact_id: &str) -> Result<String, StorageError>;

    /// Metadata for a stored artifact, if known.
    fn metadata(&self, artifact_id: &str) -> Option<StoredArtifact>;
}

/// Generates a new artifact id.
pub fn new_artifact_id() -> String {
    format!("artifact-{}", Uuid::new_v4())
}

/// Computes the SHA-256 checksum of data.
pub fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn describe(id: String, location: String, content: &str, kind: ArtifactKind, language: &str) -> StoredArtifact {
    StoredArtifact {
        id,
        location,
        kind,
        language: language.to_string(),
        size: content.len() as u64,
        checksum: compute_checksum(content.as_bytes()),
        created_at: Utc::now(),
    }
}

/// Stores artifacts as files under a base directory, one file per artifact.
///
/// Metadata is kept in memory for the lifetime of the store.
#[derive(Debug)]
pub struct FsArtifactStore {
    base_path: PathBuf,
    index: RwLock<HashMap<String, StoredArtifact>>,
}

impl FsArtifactStore {
    /// Creates a store rooted at `base_path`. The directory is created lazily.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            index: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the base storage path.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    async fn ensure_directories(&self) -> Result<(), StorageError> {
        fs::create_dir_all(&self.base_path).await.map_err(|e| {
            StorageError::DirectoryCreationFailed(format!(
                "Failed to create base directory {:?}: {}",
                self.base_path, e
            ))
        })
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn store_artifact(
        &self,
        content: &str,
        kind: ArtifactKind,
        language: &str,
    ) -> Result<StoredArtifact, StorageError> {
        self.ensure_directories().await?;

        let id = new_artifact_id();
        let file_path = self
            .base_path
            .join(format!("{}.{}", id, kind.extension(language)));

        let mut file = fs::File::create(&file_path).await?;
        file.write_all(content.as_bytes()).await?;
        file.sync_all().await?;

        let artifact = describe(
            id,
            file_path.to_string_lossy().into_owned(),
            content,
            kind,
            language,
        );
        self.index
            .write()
            .expect("artifact index lock poisoned")
            .insert(artifact.id.clone(), artifact.clone());

        tracing::info!(
            artifact_id = %artifact.id,
            kind = %kind,
            size = artifact.size,
            path = %artifact.location,
            "Stored artifact"
        );
        Ok(artifact)
    }

    async fn retrieve(&self, artifact_id: &str) -> Result<String, StorageError> {
        let artifact = self
            .metadata(artifact_id)
            .ok_or_else(|| StorageError::NotFound(artifact_id.to_string()))?;

        let content = fs::read_to_string(&artifact.location).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(artifact_id.to_string())
            } else {
                StorageError::Io(e)
            }
        })?;

        let actual = compute_checksum(content.as_bytes());
        if actual != artifact.checksum {
            return Err(StorageError::ChecksumMismatch {
                expected: artifact.checksum,
                actual,
            });
        }
        Ok(content)
    }

    fn metadata(&self, artifact_id: &str) -> Option<StoredArtifact> {
        self.index
            .read()
            .expect("artifact index lock poisoned")
            .get(artifact_id)
            .cloned()
    }
}

/// Keeps artifacts in process memory. Used by tests and offline runs.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    artifacts: RwLock<HashMap<String, (StoredArtifact, String)>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.artifacts
            .read()
            .expect("artifact store lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn store_artifact(
        &self,
        content: &str,
        kind: ArtifactKind,
        language: &str,
    ) -> Result<StoredArtifact, StorageError> {
        let id = new_artifact_id();
        let artifact = describe(id.clone(), format!("memory://{}", id), content, kind, language);
        self.artifacts
            .write()
            .expect("artifact store lock poisoned")
            .insert(id, (artifact.clone(), content.to_string()));
        Ok(artifact)
    }

    async fn retrieve(&self, artifact_id: &str) -> Result<String, StorageError> {
        self.artifacts
            .read()
            .expect("artifact store lock poisoned")
            .get(artifact_id)
            .map(|(_, content)| content.clone())
            .ok_or_else(|| StorageError::NotFound(artifact_id.to_string()))
    }

    fn metadata(&self, artifact_id: &str) -> Option<StoredArtifact> {
        self.artifacts
            .read()
            .expect("artifact store lock poisoned")
            .get(artifact_id)
            .map(|(meta, _)| meta.clone())
    }
}
