//! Checkpoint storage backends for Forgehand.

pub mod file_backend;
pub mod in_memory;

pub use file_backend::FileBackend;
pub use in_memory::InMemoryBackend;

use forgehand_config::CheckpointConfig;
use forgehand_core::checkpoint::CheckpointStore;
use std::sync::Arc;

/// Build the store selected by `[checkpoint]`.
pub fn build_from_config(config: &CheckpointConfig) -> CheckpointStore {
    match config.backend.as_str() {
        "memory" => CheckpointStore::new(Arc::new(InMemoryBackend::new())),
        _ => CheckpointStore::new(Arc::new(FileBackend::new(&config.path))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selects_backend_by_name() {
        let mut config = CheckpointConfig::default();
        assert_eq!(build_from_config(&config).backend_name(), "file");
        config.backend = "memory".into();
        assert_eq!(build_from_config(&config).backend_name(), "in_memory");
    }
}
