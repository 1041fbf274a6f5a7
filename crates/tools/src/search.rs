//! Search tools.

use async_trait::async_trait;
use patchwright_core::error::ToolError;
use patchwright_core::tool::{Tool, ToolCallRequest, ToolResult};
use patchwright_planner::WorkspaceScanner;
use std::path::PathBuf;

/// Lines of output before the listing is cut short.
const MAX_LISTED: usize = 200;

/// `codebase_search`: literal, case-insensitive by default, across the
/// project's text files.
pub struct CodebaseSearchTool {
    root: PathBuf,
    scanner: WorkspaceScanner,
}

impl CodebaseSearchTool {
    pub fn new(root: impl Into<PathBuf>, scanner: WorkspaceScanner) -> Self {
        Self {
            root: root.into(),
            scanner,
        }
    }
}

#[async_trait]
impl Tool for CodebaseSearchTool {
    fn name(&self) -> &str {
        "codebase_search"
    }

    fn description(&self) -> &str {
        "Find project files containing a literal string, with match counts."
    }

    async fn execute(&self, call: &ToolCallRequest) -> Result<ToolResult, ToolError> {
        let query = call.require_str("query")?.to_string();
        if query.trim().is_empty() {
            return Err(ToolError::InvalidArguments("'query' is empty".into()));
        }
        let case_sensitive = call.flag("case_sensitive");

        let scanner = self.scanner.clone();
        let root = self.root.clone();
        let pattern = query.clone();
        let matches = tokio::task::spawn_blocking(move || {
            scanner.scan_for_matches(&pattern, &root, case_sensitive)
        })
        .await
        .map_err(|e| ToolError::ExecutionFailed {
            tool_name: self.name().into(),
            reason: e.to_string(),
        })?;

        if matches.is_empty() {
            return Ok(ToolResult::ok(&call.id, format!("No matches for '{query}'")));
        }

        let total: usize = matches.iter().map(|m| m.occurrences).sum();
        let mut lines: Vec<String> = matches
            .iter()
            .take(MAX_LISTED)
            .map(|m| {
                let noun = if m.occurrences == 1 { "match" } else { "matches" };
                format!("{}: {} {noun}", m.path.display(), m.occurrences)
            })
            .collect();
        if matches.len() > MAX_LISTED {
            lines.push(format!("... {} more file(s)", matches.len() - MAX_LISTED));
        }

        let mut result = ToolResult::ok(&call.id, lines.join("\n"));
        result.data = Some(serde_json::json!({
            "files": matches.len(),
            "occurrences": total,
        }));
        Ok(result)
    }
}

/// `web_search`: no search backend ships with patchwright.
pub struct WebSearchTool;

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Web search (no backend configured)."
    }

    async fn execute(&self, _call: &ToolCallRequest) -> Result<ToolResult, ToolError> {
        Err(ToolError::NotConfigured("web_search has no search backend".into()))
    }
}
