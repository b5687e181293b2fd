//! File-based checkpoint backend — one pretty-printed JSON document.
//!
//! Default location: `~/.forgehand/checkpoint.json`. The document is
//! human-inspectable and can be deleted by hand to abandon a task.

use async_trait::async_trait;
use forgehand_core::checkpoint::CheckpointBackend;
use forgehand_core::error::CheckpointError;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Stores the checkpoint slot as a single file.
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        debug!(path = %path.display(), "File checkpoint backend ready");
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CheckpointBackend for FileBackend {
    fn name(&self) -> &str {
        "file"
    }

    async fn read(&self) -> Result<Option<String>, CheckpointError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CheckpointError::Storage(format!(
                "Failed to read {}: {e}",
                self.path.display()
            ))),
        }
    }

    async fn write(&self, contents: &str) -> Result<(), CheckpointError> {
        // Ensure parent directory exists
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                CheckpointError::Storage(format!("Failed to create checkpoint directory: {e}"))
            })?;
        }

        tokio::fs::write(&self.path, contents).await.map_err(|e| {
            CheckpointError::Storage(format!("Failed to write checkpoint file: {e}"))
        })
    }

    async fn remove(&self) -> Result<(), CheckpointError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CheckpointError::Storage(format!(
                "Failed to delete checkpoint file: {e}"
            ))),
        }
    }
}
