//! Checkpoint tools — let the model save, read, and clear its task record.

use async_trait::async_trait;
use forgehand_core::checkpoint::{CheckpointRecord, CheckpointStore};
use forgehand_core::error::ToolError;
use forgehand_core::tool::{Tool, ToolResult};
use crate::workspace::str_arg;

fn string_list(arguments: &serde_json::Value, key: &str) -> Vec<String> {
    arguments[key]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

pub struct SaveCheckpointTool {
    store: CheckpointStore,
}

impl SaveCheckpointTool {
    pub fn new(store: CheckpointStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for SaveCheckpointTool {
    fn name(&self) -> &str {
        "save_checkpoint"
    }

    fn description(&self) -> &str {
        "Save progress on a multi-step task so a later phase can resume it. Overwrites any \
         previous checkpoint. Save after each meaningful step."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "goal": { "type": "string", "description": "The overall task goal" },
                "acceptance_criteria": { "type": "string", "description": "How to verify the task is done" },
                "files_touched": { "type": "array", "items": { "type": "string" } },
                "completed_steps": { "type": "array", "items": { "type": "string" } },
                "next_step": { "type": "string", "description": "What to do next" },
                "last_result": { "type": "string", "description": "Outcome of the most recent step" }
            },
            "required": ["goal", "next_step"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let mut record = CheckpointRecord::new(
            str_arg(&arguments, "goal")?,
            str_arg(&arguments, "next_step")?,
        );
        record.acceptance_criteria = arguments["acceptance_criteria"].as_str().unwrap_or("").to_string();
        record.files_touched = string_list(&arguments, "files_touched");
        record.completed_steps = string_list(&arguments, "completed_steps");
        record.last_result = arguments["last_result"].as_str().map(str::to_string);

        let saved = self.store.save(record).await.map_err(|e| ToolError::ExecutionFailed {
            tool_name: "save_checkpoint".into(),
            reason: e.to_string(),
        })?;
        Ok(ToolResult::ok(
            "",
            format!(
                "Checkpoint saved ({} completed steps). Next: {}",
                saved.completed_steps.len(),
                saved.next_step
            ),
        ))
    }
}

pub struct LoadCheckpointTool {
    store: CheckpointStore,
}

impl LoadCheckpointTool {
    pub fn new(store: CheckpointStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for LoadCheckpointTool {
    fn name(&self) -> &str {
        "load_checkpoint"
    }

    fn description(&self) -> &str {
        "Read the saved task checkpoint, if any."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        Ok(match self.store.load().await {
            Some(record) => ToolResult::ok("", record.render()),
            None => ToolResult::ok("", "No checkpoint saved."),
        })
    }
}

pub struct ClearCheckpointTool {
    store: CheckpointStore,
}

impl ClearCheckpointTool {
    pub fn new(store: CheckpointStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for ClearCheckpointTool {
    fn name(&self) -> &str {
        "clear_checkpoint"
    }

    fn description(&self) -> &str {
        "Delete the task checkpoint. Only call this after verifying every acceptance criterion."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        self.store.clear().await.map_err(|e| ToolError::ExecutionFailed {
            tool_name: "clear_checkpoint".into(),
            reason: e.to_string(),
        })?;
        Ok(ToolResult::ok("", "Checkpoint cleared."))
    }
}
