//! Workspace areas and path confinement.
//!
//! File tools address two roots: the knowledge base (`kb`, read-only) and the
//! source repository (`repo`, read/write). Every path argument is relative to
//! one of them and is rejected if it escapes it, lexically or via symlinks.

use forgehand_core::error::ToolError;
use std::path::{Component, Path, PathBuf};

/// Which root a path is relative to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Area {
    Kb,
    Repo,
}

impl Area {
    pub fn parse(raw: &str) -> Result<Self, ToolError> {
        match raw {
            "kb" => Ok(Self::Kb),
            "repo" => Ok(Self::Repo),
            other => Err(ToolError::InvalidArguments(format!(
                "area must be \"kb\" or \"repo\", got \"{other}\""
            ))),
        }
    }
}

/// The two roots plus read limits, shared by all file tools.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub kb_root: PathBuf,
    pub repo_root: PathBuf,
    pub max_read_bytes: usize,
}

impl Workspace {
    pub fn new(kb_root: impl Into<PathBuf>, repo_root: impl Into<PathBuf>) -> Self {
        Self {
            kb_root: kb_root.into(),
            repo_root: repo_root.into(),
            max_read_bytes: 100_000,
        }
    }

    pub fn with_max_read_bytes(mut self, max: usize) -> Self {
        self.max_read_bytes = max;
        self
    }

    pub fn root(&self, area: Area) -> &Path {
        match area {
            Area::Kb => &self.kb_root,
            Area::Repo => &self.repo_root,
        }
    }

    /// Resolve `relative` inside `area`, rejecting anything that leaves the root.
    pub fn resolve(&self, tool_name: &str, area: Area, relative: &str) -> Result<PathBuf, ToolError> {
        let denied = |reason: String| ToolError::PermissionDenied {
            tool_name: tool_name.to_string(),
            reason,
        };

        let root = self.root(area);
        let mut resolved = root.to_path_buf();
        let mut depth = 0usize;

        for component in Path::new(relative).components() {
            match component {
                Component::Normal(part) => {
                    resolved.push(part);
                    depth += 1;
                }
                Component::CurDir => {}
                Component::ParentDir => {
                    if depth == 0 {
                        return Err(denied(format!("'{relative}' escapes the workspace")));
                    }
                    resolved.pop();
                    depth -= 1;
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(denied(format!(
                        "'{relative}' must be relative to the {} root",
                        area_name(area)
                    )));
                }
            }
        }

        // Symlinks inside the tree must not point outside it.
        if let Some(existing) = deepest_existing(&resolved)
            && let (Ok(real), Ok(real_root)) = (existing.canonicalize(), root.canonicalize())
            && !real.starts_with(&real_root)
        {
            return Err(denied(format!("'{relative}' resolves outside the workspace")));
        }

        Ok(resolved)
    }

    /// Path relative to the area root, with `/` separators, for display.
    pub fn display(&self, area: Area, path: &Path) -> String {
        path.strip_prefix(self.root(area))
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }
}

fn area_name(area: Area) -> &'static str {
    match area {
        Area::Kb => "kb",
        Area::Repo => "repo",
    }
}

fn deepest_existing(path: &Path) -> Option<&Path> {
    path.ancestors().find(|p| p.exists())
}

/// Fetch a required string argument.
pub(crate) fn str_arg<'a>(arguments: &'a serde_json::Value, key: &str) -> Result<&'a str, ToolError> {
    arguments[key]
        .as_str()
        .ok_or_else(|| ToolError::InvalidArguments(format!("Missing '{key}' argument")))
}

/// Fetch the `area` argument, defaulting to `repo`.
pub(crate) fn area_arg(arguments: &serde_json::Value) -> Result<Area, ToolError> {
    arguments["area"].as_str().map_or(Ok(Area::Repo), Area::parse)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace() -> (tempfile::TempDir, Workspace) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("kb")).unwrap();
        std::fs::create_dir_all(dir.path().join("repo/src")).unwrap();
        let ws = Workspace::new(dir.path().join("kb"), dir.path().join("repo"));
        (dir, ws)
    }

    #[test]
    fn resolves_inside_root() {
        let (_dir, ws) = workspace();
        let p = ws.resolve("read_file", Area::Repo, "src/./main.rs").unwrap();
        assert_eq!(p, ws.repo_root.join("src").join("main.rs"));
        let p = ws.resolve("read_file", Area::Repo, "src/../Cargo.toml").unwrap();
        assert_eq!(p, ws.repo_root.join("Cargo.toml"));
    }

    #[test]
    fn rejects_escape_and_absolute() {
        let (_dir, ws) = workspace();
        assert!(matches!(
            ws.resolve("read_file", Area::Repo, "../kb/notes.md"),
            Err(ToolError::PermissionDenied { .. })
        ));
        assert!(matches!(
            ws.resolve("read_file", Area::Kb, "/etc/passwd"),
            Err(ToolError::PermissionDenied { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn rejects_symlink_escape() {
        let (dir, ws) = workspace();
        std::os::unix::fs::symlink(dir.path().join("kb"), ws.repo_root.join("sneaky")).unwrap();
        assert!(ws.resolve("read_file", Area::Repo, "sneaky/x.md").is_err());
    }

    #[test]
    fn area_parsing() {
        assert_eq!(Area::parse("kb").unwrap(), Area::Kb);
        assert!(Area::parse("home").is_err());
        assert_eq!(area_arg(&serde_json::json!({})).unwrap(), Area::Repo);
    }
}
