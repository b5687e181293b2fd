//! Commit (and optionally push) everything in the repository.

use async_trait::async_trait;
use forgehand_core::error::ToolError;
use forgehand_core::tool::{Tool, ToolResult};
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, warn};
use crate::workspace::str_arg;

pub struct GitCommitPushTool {
    repo: PathBuf,
    remote: String,
    branch: String,
    timeout: Duration,
}

impl GitCommitPushTool {
    pub fn new(repo: impl Into<PathBuf>, remote: impl Into<String>, branch: impl Into<String>, timeout: Duration) -> Self {
        Self {
            repo: repo.into(),
            remote: remote.into(),
            branch: branch.into(),
            timeout,
        }
    }

    /// Run one git step; `Ok` carries (success, combined output).
    async fn git(&self, args: &[&str]) -> Result<(bool, String), ToolError> {
        let mut cmd = Command::new("git");
        cmd.args(args).current_dir(&self.repo).kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| ToolError::Timeout {
                tool_name: "git_commit_push".into(),
                timeout_secs: self.timeout.as_secs(),
            })?
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "git_commit_push".into(),
                reason: format!("failed to run git: {e}"),
            })?;

        let text = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        Ok((output.status.success(), text.trim().to_string()))
    }
}

#[async_trait]
impl Tool for GitCommitPushTool {
    fn name(&self) -> &str {
        "git_commit_push"
    }

    fn description(&self) -> &str {
        "Stage all changes in the repository, commit them with the given message, and push \
         to the configured remote branch unless push is false."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "message": { "type": "string", "description": "Commit message" },
                "push": { "type": "boolean", "description": "Push after committing (default true)" }
            },
            "required": ["message"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let message = str_arg(&arguments, "message")?;
        if message.trim().is_empty() {
            return Err(ToolError::InvalidArguments("message must not be empty".into()));
        }
        let push = arguments["push"].as_bool().unwrap_or(true);

        let mut log = Vec::new();

        let (ok, out) = self.git(&["add", "-A"]).await?;
        if !ok {
            return Ok(ToolResult::failure("", format!("git add failed:\n{out}")));
        }

        let (ok, out) = self.git(&["commit", "-m", message]).await?;
        if !ok {
            return Ok(ToolResult::failure("", format!("git commit failed:\n{out}")));
        }
        log.push(out);

        if push {
            let (ok, out) = self.git(&["push", &self.remote, &self.branch]).await?;
            if !ok {
                warn!(remote = %self.remote, branch = %self.branch, "git push failed");
                log.push(format!("git push failed:\n{out}"));
                return Ok(ToolResult::failure("", log.join("\n")));
            }
            info!(remote = %self.remote, branch = %self.branch, "Pushed commit");
            log.push(out);
        }

        Ok(ToolResult::ok("", log.join("\n")))
    }
}
