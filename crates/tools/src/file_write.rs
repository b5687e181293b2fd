//! File write and edit tools — repository only.

use async_trait::async_trait;
use forgehand_core::error::ToolError;
use forgehand_core::tool::{Tool, ToolResult};
use crate::workspace::{str_arg, Area, Workspace};

/// Create or overwrite a file in the repository.
pub struct WriteFileTool {
    workspace: Workspace,
}

impl WriteFileTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file in the repository. Creates the file and any missing parent \
         directories; overwrites an existing file."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path relative to the repository root" },
                "content": { "type": "string", "description": "The full file content" }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let rel = str_arg(&arguments, "path")?;
        let content = str_arg(&arguments, "content")?;
        let path = self.workspace.resolve(self.name(), Area::Repo, rel)?;

        if let Some(parent) = path.parent()
            && let Err(e) = tokio::fs::create_dir_all(parent).await
        {
            return Ok(ToolResult::failure("", format!("Failed to create directories for {rel}: {e}")));
        }

        match tokio::fs::write(&path, content).await {
            Ok(()) => Ok(ToolResult::ok("", format!("Wrote {} bytes to {rel}", content.len()))),
            Err(e) => Ok(ToolResult::failure("", format!("Failed to write {rel}: {e}"))),
        }
    }
}

/// Replace exactly one occurrence of a string in a repository file.
pub struct EditFileTool {
    workspace: Workspace,
}

impl EditFileTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Replace old_text with new_text in a repository file. old_text must occur exactly once; \
         include enough surrounding lines to make it unique."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path relative to the repository root" },
                "old_text": { "type": "string", "description": "Exact text to replace" },
                "new_text": { "type": "string", "description": "Replacement text" }
            },
            "required": ["path", "old_text", "new_text"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let rel = str_arg(&arguments, "path")?;
        let old_text = str_arg(&arguments, "old_text")?;
        let new_text = str_arg(&arguments, "new_text")?;
        if old_text.is_empty() {
            return Err(ToolError::InvalidArguments("old_text must not be empty".into()));
        }
        let path = self.workspace.resolve(self.name(), Area::Repo, rel)?;

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) => return Ok(ToolResult::failure("", format!("Failed to read {rel}: {e}"))),
        };

        match content.matches(old_text).count() {
            0 => Ok(ToolResult::failure("", format!("old_text not found in {rel}"))),
            1 => {
                let updated = content.replacen(old_text, new_text, 1);
                match tokio::fs::write(&path, updated).await {
                    Ok(()) => Ok(ToolResult::ok("", format!("Edited {rel}"))),
                    Err(e) => Ok(ToolResult::failure("", format!("Failed to write {rel}: {e}"))),
                }
            }
            n => Ok(ToolResult::failure(
                "",
                format!("old_text occurs {n} times in {rel}; make it unique"),
            )),
        }
    }
}
