//! Artifact persistence.
//!
//! The pipeline only sees the [`ArtifactStore`] trait: it hands over the
//! final code and keeps the returned id. Where the bytes go is up to the
//! implementation.
//!
//! ```rust,ignore
//! use codeforge::storage::{ArtifactKind, ArtifactStore, FsArtifactStore};
//!
//! let store = FsArtifactStore::new("./artifacts");
//! let artifact = store.store_artifact(code, ArtifactKind::Code, "python").await?;
//! println!("{} -> {}", artifact.id, artifact.location);
//! ```

pub mod artifacts;

pub use crate::error::StorageError;
pub use artifacts::{
    compute_checksum, new_artifact_id, ArtifactKind, ArtifactStore, FsArtifactStore,
    MemoryArtifactStore, StoredArtifact,
};
