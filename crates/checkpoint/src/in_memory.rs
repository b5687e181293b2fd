//! In-memory backend — useful for testing and ephemeral sessions.

use async_trait::async_trait;
use forgehand_core::checkpoint::CheckpointBackend;
use forgehand_core::error::CheckpointError;
use tokio::sync::RwLock;

/// Keeps the checkpoint document in process memory.
#[derive(Default)]
pub struct InMemoryBackend {
    slot: RwLock<Option<String>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointBackend for InMemoryBackend {
    fn name(&self) -> &str { "in_memory" }

    async fn read(&self) -> Result<Option<String>, CheckpointError> {
        Ok(self.slot.read().await.clone())
    }

    async fn write(&self, contents: &str) -> Result<(), CheckpointError> {
        *self.slot.write().await = Some(contents.to_string());
        Ok(())
    }

    async fn remove(&self) -> Result<(), CheckpointError> {
        self.slot.write().await.take();
        Ok(())
    }
}
