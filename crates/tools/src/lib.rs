//! Built-in tool implementations for Forgehand.
//!
//! Tools give the agent the ability to work on a project: read the knowledge
//! base, read and edit the repository, search, run allow-listed commands,
//! commit and push, and keep a resumable checkpoint.

pub mod checkpoint;
pub mod file_read;
pub mod file_write;
pub mod git;
pub mod list_dir;
pub mod search;
pub mod shell;
pub mod workspace;

use forgehand_config::WorkspaceConfig;
use forgehand_core::checkpoint::CheckpointStore;
use forgehand_core::tool::ToolRegistry;
use std::time::Duration;

pub use workspace::{Area, Workspace};

/// Create the tool registry for a workspace.
///
/// Security defaults:
/// - File tools are confined to the knowledge base and repository roots
/// - Writes, edits, commands, and git only touch the repository
/// - Commands are limited to `allowed_commands` and a timeout
pub fn default_registry(config: &WorkspaceConfig, checkpoints: CheckpointStore) -> ToolRegistry {
    let ws = Workspace::new(&config.knowledge_dir, &config.repo_dir)
        .with_max_read_bytes(config.max_read_bytes);
    let timeout = Duration::from_secs(config.command_timeout_secs);

    let mut registry = ToolRegistry::new();
    registry.register(Box::new(file_read::ReadFileTool::new(ws.clone())));
    registry.register(Box::new(file_write::WriteFileTool::new(ws.clone())));
    registry.register(Box::new(file_write::EditFileTool::new(ws.clone())));
    registry.register(Box::new(list_dir::ListDirTool::new(ws.clone())));
    registry.register(Box::new(search::SearchFilesTool::new(ws)));
    registry.register(Box::new(shell::RunCommandTool::new(
        config.allowed_commands.clone(),
        &config.repo_dir,
        timeout,
    )));
    registry.register(Box::new(git::GitCommitPushTool::new(
        &config.repo_dir,
        &config.git_remote,
        &config.git_branch,
        timeout,
    )));
    registry.register(Box::new(checkpoint::SaveCheckpointTool::new(checkpoints.clone())));
    registry.register(Box::new(checkpoint::LoadCheckpointTool::new(checkpoints.clone())));
    registry.register(Box::new(checkpoint::ClearCheckpointTool::new(checkpoints)));
    registry
}
