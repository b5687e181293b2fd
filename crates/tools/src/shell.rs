//! Shell tool — run allow-listed commands inside the repository.
//!
//! Supports command allowlisting (every pipeline stage), repository
//! scoping, and a hard timeout.

use async_trait::async_trait;
use forgehand_core::error::ToolError;
use forgehand_core::tool::{Tool, ToolResult};
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};
use crate::workspace::str_arg;

/// Max bytes of combined output returned to the model.
const MAX_OUTPUT_BYTES: usize = 30_000;

/// Execute shell commands with safety constraints.
pub struct RunCommandTool {
    /// Only these base commands are allowed.
    allowed_commands: Vec<String>,
    cwd: PathBuf,
    timeout: Duration,
}

impl RunCommandTool {
    pub fn new(allowed_commands: Vec<String>, cwd: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            allowed_commands,
            cwd: cwd.into(),
            timeout,
        }
    }

    /// Returns the first disallowed base command, if any.
    ///
    /// Command chaining and substitution are refused outright; pipes are
    /// allowed when every stage starts with an allowed command.
    fn check_command(&self, command: &str) -> Result<(), String> {
        // A lone `&` backgrounds whatever follows it, so it goes with `&&`.
        for forbidden in [";", "&", "||", "`", "$(", ">", "<", "\n", "\r"] {
            if command.contains(forbidden) {
                return Err(format!("'{forbidden}' is not allowed; run one command at a time"));
            }
        }
        for stage in command.split('|') {
            let base = stage.split_whitespace().next().unwrap_or("");
            if base.is_empty() {
                return Err("empty command".into());
            }
            if !self.allowed_commands.iter().any(|a| a == base) {
                return Err(format!("Command '{base}' not in allowlist"));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Tool for RunCommandTool {
    fn name(&self) -> &str { "run_command" }

    fn description(&self) -> &str {
        "Run a shell command in the repository directory and return stdout/stderr. \
         Only allow-listed programs may be used; pipes are allowed, chaining is not."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": format!("The command to run. Allowed programs: {}", self.allowed_commands.join(", "))
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let command = str_arg(&arguments, "command")?;

        if let Err(reason) = self.check_command(command) {
            return Err(ToolError::PermissionDenied {
                tool_name: "run_command".into(),
                reason,
            });
        }

        debug!(command = %command, cwd = %self.cwd.display(), "Executing shell command");

        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command]);
            c
        };
        cmd.current_dir(&self.cwd).kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(result) => result.map_err(|e| ToolError::ExecutionFailed {
                tool_name: "run_command".into(),
                reason: e.to_string(),
            })?,
            Err(_) => {
                warn!(command = %command, "Command timed out");
                return Err(ToolError::Timeout {
                    tool_name: "run_command".into(),
                    timeout_secs: self.timeout.as_secs(),
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let success = output.status.success();

        let result_text = if success {
            if stderr.trim().is_empty() {
                stdout.to_string()
            } else {
                format!("{stdout}\n[stderr]: {stderr}")
            }
        } else {
            let code = output.status.code().unwrap_or(-1);
            warn!(command = %command, exit_code = code, "Command failed");
            format!("[exit code: {code}]\n{stdout}\n{stderr}")
        };

        let trimmed = result_text.trim();
        let output = if trimmed.len() > MAX_OUTPUT_BYTES {
            format!(
                "{}\n[output truncated at {MAX_OUTPUT_BYTES} bytes]",
                crate::file_read::truncate_bytes(trimmed, MAX_OUTPUT_BYTES)
            )
        } else if trimmed.is_empty() {
            "(no output)".to_string()
        } else {
            trimmed.to_string()
        };

        Ok(ToolResult {
            call_id: String::new(),
            success,
            output,
        })
    }
}
