use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use strum::Display;

use crate::models::job::Identifier;

/// Fixed extension for every stored artifact.
const ARTIFACT_EXTENSION: &str = "jpg";

/// Logical namespace an artifact lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Namespace {
    Unprocessed,
    Processed,
}

/// Filesystem artifact store keyed by image identifier.
///
/// Every write goes to a temporary file in the target directory and is then
/// linked into place without clobbering, so readers never observe a partial
/// artifact and an existing key is never overwritten.
pub struct ArtifactStore {
    unprocessed_dir: PathBuf,
    processed_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(
        unprocessed_dir: impl Into<PathBuf>,
        processed_dir: impl Into<PathBuf>,
    ) -> Result<Self, StorageError> {
        let unprocessed_dir = unprocessed_dir.into();
        let processed_dir = processed_dir.into();
        std::fs::create_dir_all(&unprocessed_dir)?;
        std::fs::create_dir_all(&processed_dir)?;

        Ok(Self {
            unprocessed_dir,
            processed_dir,
        })
    }

    fn dir(&self, namespace: Namespace) -> &Path {
        match namespace {
            Namespace::Unprocessed => &self.unprocessed_dir,
            Namespace::Processed => &self.processed_dir,
        }
    }

    fn path(&self, namespace: Namespace, id: &Identifier) -> PathBuf {
        self.dir(namespace).join(format!("{}.{}", id.as_str(), ARTIFACT_EXTENSION))
    }

    /// Store bytes under a key that must not exist yet.
    ///
    /// Fails with [`StorageError::AlreadyExists`] if the key is taken; of two
    /// concurrent writers for the same key exactly one succeeds.
    pub async fn put_new(
        &self,
        namespace: Namespace,
        id: &Identifier,
        data: Vec<u8>,
    ) -> Result<(), StorageError> {
        let dir = self.dir(namespace).to_path_buf();
        let target = self.path(namespace, id);

        let persisted = tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut staged = tempfile::Builder::new()
                .prefix(".incoming-")
                .suffix(".part")
                .tempfile_in(&dir)?;
            staged.write_all(&data)?;
            staged.as_file().sync_all()?;
            staged.persist_noclobber(&target).map_err(|e| e.error)?;
            Ok(())
        })
        .await?;

        match persisted {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(StorageError::AlreadyExists {
                namespace,
                id: id.to_string(),
            }),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    /// Open an artifact for streaming.
    pub async fn open(
        &self,
        namespace: Namespace,
        id: &Identifier,
    ) -> Result<StoredArtifact, StorageError> {
        let file = match tokio::fs::File::open(self.path(namespace, id)).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StorageError::NotFound {
                    namespace,
                    id: id.to_string(),
                })
            }
            Err(e) => return Err(StorageError::Io(e)),
        };
        let len = file.metadata().await?.len();
        Ok(StoredArtifact { file, len })
    }

    /// Remove an artifact. Returns `false` if it was already gone.
    pub async fn delete(&self, namespace: Namespace, id: &Identifier) -> Result<bool, StorageError> {
        match tokio::fs::remove_file(self.path(namespace, id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    /// Check both namespace directories are reachable (for health checks).
    pub async fn health_check(&self) -> Result<(), StorageError> {
        for namespace in [Namespace::Unprocessed, Namespace::Processed] {
            let metadata = tokio::fs::metadata(self.dir(namespace)).await?;
            if !metadata.is_dir() {
                return Err(StorageError::Io(std::io::Error::new(
                    ErrorKind::NotFound,
                    format!("{namespace} directory is not a directory"),
                )));
            }
        }
        Ok(())
    }
}

/// An open artifact. Artifacts are never modified once linked into place, so
/// `len` stays accurate for as long as the handle is held.
#[derive(Debug)]
pub struct StoredArtifact {
    pub file: tokio::fs::File,
    pub len: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Artifact {namespace}/{id} not found")]
    NotFound { namespace: Namespace, id: String },

    #[error("Artifact {namespace}/{id} already exists")]
    AlreadyExists { namespace: Namespace, id: String },

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
