//! Regex search across files in an area.
//!
//! Walks the tree on a blocking thread, skipping VCS and build directories
//! and files that are not valid UTF-8.

use async_trait::async_trait;
use forgehand_core::error::ToolError;
use forgehand_core::tool::{Tool, ToolResult};
use regex_lite::Regex;
use std::path::{Path, PathBuf};
use crate::workspace::{area_arg, str_arg, Workspace};

const MAX_MATCHES: usize = 200;
const MAX_LINE_CHARS: usize = 200;
const SKIP_DIRS: &[&str] = &[".git", "target", "node_modules", ".venv", "dist", "build"];

pub struct SearchFilesTool {
    workspace: Workspace,
}

impl SearchFilesTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for SearchFilesTool {
    fn name(&self) -> &str {
        "search_files"
    }

    fn description(&self) -> &str {
        "Search file contents with a regular expression. Returns matching lines as \
         'file:line: text', capped at 200 matches."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "area": { "type": "string", "enum": ["kb", "repo"], "description": "Which root (default repo)" },
                "pattern": { "type": "string", "description": "Regular expression" },
                "path": { "type": "string", "description": "Sub-directory to search (default: the root)" }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let area = area_arg(&arguments)?;
        let pattern = str_arg(&arguments, "pattern")?;
        let regex = Regex::new(pattern)
            .map_err(|e| ToolError::InvalidArguments(format!("Invalid pattern: {e}")))?;
        let rel = arguments["path"].as_str().unwrap_or(".");
        let start = self.workspace.resolve(self.name(), area, rel)?;
        let root = self.workspace.root(area).to_path_buf();

        let (matches, truncated) = tokio::task::spawn_blocking(move || search_tree(&root, &start, &regex))
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "search_files".into(),
                reason: e.to_string(),
            })?;

        if matches.is_empty() {
            return Ok(ToolResult::ok("", format!("No matches for /{pattern}/")));
        }
        let mut output = matches.join("\n");
        if truncated {
            output.push_str(&format!("\n[stopped after {MAX_MATCHES} matches]"));
        }
        Ok(ToolResult::ok("", output))
    }
}

fn search_tree(root: &Path, start: &Path, regex: &Regex) -> (Vec<String>, bool) {
    let mut matches = Vec::new();
    let mut stack: Vec<PathBuf> = vec![start.to_path_buf()];

    while let Some(path) = stack.pop() {
        if path.is_dir() {
            let Ok(reader) = std::fs::read_dir(&path) else { continue };
            let mut children: Vec<PathBuf> = reader
                .filter_map(|e| e.ok())
                .filter(|e| !e.file_name().to_str().is_some_and(|n| SKIP_DIRS.contains(&n)))
                .map(|e| e.path())
                .collect();
            // Reverse so popping visits entries in name order.
            children.sort();
            children.reverse();
            stack.extend(children);
            continue;
        }

        let Ok(content) = std::fs::read_to_string(&path) else { continue };
        let display = path
            .strip_prefix(root)
            .unwrap_or(&path)
            .to_string_lossy()
            .replace('\\', "/");
        for (n, line) in content.lines().enumerate() {
            if regex.is_match(line) {
                let line: String = line.trim().chars().take(MAX_LINE_CHARS).collect();
                matches.push(format!("{display}:{}: {line}", n + 1));
                if matches.len() >= MAX_MATCHES {
                    return (matches, true);
                }
            }
        }
    }

    (matches, false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, SearchFilesTool) {
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path().join("repo");
        std::fs::create_dir_all(repo.join("src")).unwrap();
        std::fs::create_dir_all(repo.join("target")).unwrap();
        std::fs::write(repo.join("src/a.rs"), "fn alpha() {}\nfn beta() {}\n").unwrap();
        std::fs::write(repo.join("src/b.rs"), "// alpha again\n").unwrap();
        std::fs::write(repo.join("target/gen.rs"), "fn alpha_generated() {}\n").unwrap();
        let tool = SearchFilesTool::new(Workspace::new(dir.path().join("kb"), repo));
        (dir, tool)
    }

    #[tokio::test]
    async fn finds_matches_in_order_and_skips_build_dirs() {
        let (_dir, tool) = setup();
        let result = tool.execute(serde_json::json!({"pattern": "alpha"})).await.unwrap();
        assert_eq!(result.output, "src/a.rs:1: fn alpha() {}\nsrc/b.rs:1: // alpha again");
    }

    #[tokio::test]
    async fn no_matches_message() {
        let (_dir, tool) = setup();
        let result = tool.execute(serde_json::json!({"pattern": "gamma"})).await.unwrap();
        assert!(result.success);
        assert!(result.output.starts_with("No matches"));
    }

    #[tokio::test]
    async fn invalid_regex_is_argument_error() {
        let (_dir, tool) = setup();
        let err = tool.execute(serde_json::json!({"pattern": "("})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
