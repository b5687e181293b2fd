//! Directory listing tool.

use async_trait::async_trait;
use forgehand_core::error::ToolError;
use forgehand_core::tool::{Tool, ToolResult};
use crate::workspace::{area_arg, Workspace};

const MAX_ENTRIES: usize = 500;

pub struct ListDirTool {
    workspace: Workspace,
}

impl ListDirTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List the entries of a directory in the knowledge base or the repository. \
         Directories are shown with a trailing '/'."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "area": { "type": "string", "enum": ["kb", "repo"], "description": "Which root (default repo)" },
                "path": { "type": "string", "description": "Directory relative to the area root (default: the root)" }
            }
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let area = area_arg(&arguments)?;
        let rel = arguments["path"].as_str().unwrap_or(".");
        let dir = self.workspace.resolve(self.name(), area, rel)?;

        let mut reader = match tokio::fs::read_dir(&dir).await {
            Ok(r) => r,
            Err(e) => return Ok(ToolResult::failure("", format!("Failed to list {rel}: {e}"))),
        };

        let mut entries = Vec::new();
        while let Ok(Some(entry)) = reader.next_entry().await {
            let name = entry.file_name().to_string_lossy().to_string();
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            entries.push(if is_dir { format!("{name}/") } else { name });
        }
        entries.sort();

        let total = entries.len();
        if total == 0 {
            return Ok(ToolResult::ok("", "(empty directory)"));
        }
        let mut output = entries.into_iter().take(MAX_ENTRIES).collect::<Vec<_>>().join("\n");
        if total > MAX_ENTRIES {
            output.push_str(&format!("\n[{} more entries not shown]", total - MAX_ENTRIES));
        }
        Ok(ToolResult::ok("", output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lists_sorted_with_dir_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path().join("repo");
        std::fs::create_dir_all(repo.join("src")).unwrap();
        std::fs::write(repo.join("Cargo.toml"), "").unwrap();
        std::fs::write(repo.join("README.md"), "").unwrap();

        let tool = ListDirTool::new(Workspace::new(dir.path().join("kb"), &repo));
        let result = tool.execute(serde_json::json!({})).await.unwrap();
        assert!(result.success);
        assert_eq!(result.output, "Cargo.toml\nREADME.md\nsrc/");
    }

    #[tokio::test]
    async fn missing_directory_is_unsuccessful() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ListDirTool::new(Workspace::new(dir.path().join("kb"), dir.path().join("repo")));
        let result = tool
            .execute(serde_json::json!({"area": "kb", "path": "nothing"}))
            .await
            .unwrap();
        assert!(!result.success);
    }
}
