//! Checkpoint store — the single resumable task record shared across phases.
//!
//! A phase saves the record before handing off; the next phase (possibly in
//! another process) reads it on startup. The store holds at most one record.
//! Where the bytes live is decided by a [`CheckpointBackend`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};
use crate::error::CheckpointError;

/// The task record. On disk this is a camelCase JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointRecord {
    pub goal: String,

    #[serde(default)]
    pub acceptance_criteria: String,

    #[serde(default)]
    pub files_touched: Vec<String>,

    #[serde(default)]
    pub completed_steps: Vec<String>,

    #[serde(default)]
    pub next_step: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_result: Option<String>,

    /// Set by [`CheckpointStore::save`]; whatever the caller put here is replaced.
    pub saved_at: DateTime<Utc>,
}

impl CheckpointRecord {
    pub fn new(goal: impl Into<String>, next_step: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            acceptance_criteria: String::new(),
            files_touched: Vec::new(),
            completed_steps: Vec::new(),
            next_step: next_step.into(),
            last_result: None,
            saved_at: Utc::now(),
        }
    }

    /// Human-readable block used in system prompts and `checkpoint show`.
    pub fn render(&self) -> String {
        let mut out = format!("Goal: {}\n", self.goal);
        if !self.acceptance_criteria.is_empty() {
            out.push_str(&format!("Acceptance criteria: {}\n", self.acceptance_criteria));
        }
        if !self.completed_steps.is_empty() {
            out.push_str("Completed steps:\n");
            for step in &self.completed_steps {
                out.push_str(&format!("  - {step}\n"));
            }
        }
        if !self.files_touched.is_empty() {
            out.push_str(&format!("Files touched: {}\n", self.files_touched.join(", ")));
        }
        out.push_str(&format!("Next step: {}\n", self.next_step));
        if let Some(last) = &self.last_result {
            out.push_str(&format!("Last result: {last}\n"));
        }
        out.push_str(&format!("Saved at: {}", self.saved_at.to_rfc3339()));
        out
    }
}

/// Raw storage for the single checkpoint slot.
///
/// Backends move bytes only; parsing and the "corrupt means absent" rule
/// live in [`CheckpointStore`].
#[async_trait]
pub trait CheckpointBackend: Send + Sync {
    /// A human-readable name (e.g., "file", "in_memory").
    fn name(&self) -> &str;

    /// Read the stored document, `None` when the slot is empty.
    async fn read(&self) -> Result<Option<String>, CheckpointError>;

    /// Replace the stored document.
    async fn write(&self, contents: &str) -> Result<(), CheckpointError>;

    /// Empty the slot. Must succeed when it is already empty.
    async fn remove(&self) -> Result<(), CheckpointError>;
}

/// Cheap to clone; every clone addresses the same slot.
#[derive(Clone)]
pub struct CheckpointStore {
    backend: Arc<dyn CheckpointBackend>,
}

impl CheckpointStore {
    pub fn new(backend: Arc<dyn CheckpointBackend>) -> Self {
        Self { backend }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Stamp the record with the current time and overwrite the slot.
    /// Returns the record as stored.
    pub async fn save(&self, mut record: CheckpointRecord) -> Result<CheckpointRecord, CheckpointError> {
        record.saved_at = Utc::now();
        let json = serde_json::to_string_pretty(&record)
            .map_err(|e| CheckpointError::Serialization(e.to_string()))?;
        self.backend.write(&json).await?;
        debug!(backend = self.backend.name(), next_step = %record.next_step, "Checkpoint saved");
        Ok(record)
    }

    /// The stored record, or `None` when absent, unreadable or corrupt.
    pub async fn load(&self) -> Option<CheckpointRecord> {
        let raw = match self.backend.read().await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "Failed to read checkpoint, treating as absent");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(error = %e, "Corrupt checkpoint, treating as absent");
                None
            }
        }
    }

    /// Delete the record. No-op when absent.
    pub async fn clear(&self) -> Result<(), CheckpointError> {
        self.backend.remove().await?;
        debug!(backend = self.backend.name(), "Checkpoint cleared");
        Ok(())
    }
}
