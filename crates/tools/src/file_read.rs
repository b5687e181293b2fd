//! File read tool — read text from the knowledge base or the repository.

use async_trait::async_trait;
use forgehand_core::error::ToolError;
use forgehand_core::tool::{Tool, ToolResult};
use crate::workspace::{area_arg, str_arg, Workspace};

pub struct ReadFileTool {
    workspace: Workspace,
}

impl ReadFileTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

/// Cut `text` to at most `max` bytes on a char boundary.
pub(crate) fn truncate_bytes(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a text file from the knowledge base (area \"kb\") or the repository (area \"repo\"). \
         Optionally read a line range with offset (1-based) and limit."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "area": { "type": "string", "enum": ["kb", "repo"], "description": "Which root the path is relative to (default repo)" },
                "path": { "type": "string", "description": "Path relative to the area root" },
                "offset": { "type": "integer", "description": "First line to return, 1-based" },
                "limit": { "type": "integer", "description": "Maximum number of lines to return" }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let area = area_arg(&arguments)?;
        let rel = str_arg(&arguments, "path")?;
        let path = self.workspace.resolve(self.name(), area, rel)?;

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) => return Ok(ToolResult::failure("", format!("Failed to read {rel}: {e}"))),
        };

        let offset = arguments["offset"].as_u64().map(|n| n.max(1) as usize);
        let limit = arguments["limit"].as_u64().map(|n| n as usize);
        let selected = if offset.is_some() || limit.is_some() {
            let start = offset.unwrap_or(1) - 1;
            let lines = content.lines().skip(start);
            match limit {
                Some(n) => lines.take(n).collect::<Vec<_>>().join("\n"),
                None => lines.collect::<Vec<_>>().join("\n"),
            }
        } else {
            content
        };

        let max = self.workspace.max_read_bytes;
        let output = if selected.len() > max {
            format!(
                "{}\n[truncated: showing {max} of {} bytes; use offset/limit to read more]",
                truncate_bytes(&selected, max),
                selected.len()
            )
        } else {
            selected
        };

        Ok(ToolResult::ok("", output))
    }
}
