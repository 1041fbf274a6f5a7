//! Read-only file tools, confined to the project root.

use async_trait::async_trait;
use patchwright_core::error::ToolError;
use patchwright_core::tool::{Tool, ToolCallRequest, ToolResult};
use patchwright_security::resolve_in_root;
use std::path::{Path, PathBuf};
use tracing::debug;

fn confine(
    tool: &str,
    root: &Path,
    path: &str,
    forbidden: &[String],
) -> Result<(PathBuf, PathBuf), ToolError> {
    resolve_in_root(root, path, forbidden).map_err(|e| ToolError::PermissionDenied {
        tool_name: tool.into(),
        reason: e.to_string(),
    })
}

/// `read_file`: whole file, or a 1-based inclusive line range.
pub struct ReadFileTool {
    root: PathBuf,
    forbidden_paths: Vec<String>,
}

impl ReadFileTool {
    pub fn new(root: impl Into<PathBuf>, forbidden_paths: Vec<String>) -> Self {
        Self {
            root: root.into(),
            forbidden_paths,
        }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a project file, optionally limited to start_line..end_line."
    }

    async fn execute(&self, call: &ToolCallRequest) -> Result<ToolResult, ToolError> {
        let path = call.require_str("path")?;
        let (absolute, relative) = confine(self.name(), &self.root, path, &self.forbidden_paths)?;
        debug!(path = %relative.display(), "Reading file");

        let content = match tokio::fs::read_to_string(&absolute).await {
            Ok(content) => content,
            Err(e) => {
                return Ok(ToolResult::failed(
                    &call.id,
                    format!("Failed to read {}: {e}", relative.display()),
                ));
            }
        };

        let line_arg = |key: &str| call.input.get(key).and_then(|v| v.as_u64()).map(|n| n as usize);
        let output = match (line_arg("start_line"), line_arg("end_line")) {
            (None, None) => content,
            (start, end) => {
                let start = start.unwrap_or(1).max(1);
                let end = end.unwrap_or(usize::MAX);
                content
                    .lines()
                    .enumerate()
                    .filter(|(i, _)| (start..=end).contains(&(i + 1)))
                    .map(|(_, line)| line)
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        };
        Ok(ToolResult::ok(&call.id, output))
    }
}

/// `list_dir`: immediate children of a project directory, directories
/// suffixed with `/`.
pub struct ListDirTool {
    root: PathBuf,
    forbidden_paths: Vec<String>,
}

impl ListDirTool {
    pub fn new(root: impl Into<PathBuf>, forbidden_paths: Vec<String>) -> Self {
        Self {
            root: root.into(),
            forbidden_paths,
        }
    }

    fn is_forbidden(&self, relative: &Path) -> bool {
        resolve_in_root(&self.root, &relative.to_string_lossy(), &self.forbidden_paths).is_err()
    }
}

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List the entries of a project directory."
    }

    async fn execute(&self, call: &ToolCallRequest) -> Result<ToolResult, ToolError> {
        let path = call.str_arg("path").unwrap_or(".");
        let (absolute, relative) = if matches!(path.trim(), "" | "." | "./") {
            (self.root.clone(), PathBuf::new())
        } else {
            confine(self.name(), &self.root, path, &self.forbidden_paths)?
        };

        let mut dir = match tokio::fs::read_dir(&absolute).await {
            Ok(dir) => dir,
            Err(e) => {
                return Ok(ToolResult::failed(&call.id, format!("Failed to list {path}: {e}")));
            }
        };

        let mut entries = Vec::new();
        while let Ok(Some(entry)) = dir.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            if self.is_forbidden(&relative.join(&name)) {
                continue;
            }
            let is_dir = entry.file_type().await.is_ok_and(|ft| ft.is_dir());
            entries.push(if is_dir { format!("{name}/") } else { name });
        }
        entries.sort();
        Ok(ToolResult::ok(&call.id, entries.join("\n")))
    }
}
