//! Built-in tool implementations for patchwright.
//!
//! Tools let the task loop look at the project and run commands:
//! run terminal commands, read files, list directories, and search the
//! codebase. Writing files is not a tool; writes become proposed edits
//! and go through the edit pipeline.

pub mod file_read;
pub mod search;
pub mod shell;

use patchwright_config::AppConfig;
use patchwright_core::tool::ToolRegistry;
use patchwright_planner::WorkspaceScanner;
use std::path::Path;
use std::sync::Arc;

pub use file_read::{ListDirTool, ReadFileTool};
pub use search::{CodebaseSearchTool, WebSearchTool};
pub use shell::{ShellExecutor, TerminalTool};

/// Alternative names models use for the built-in tools.
pub const TOOL_ALIASES: &[(&str, &str)] = &[
    ("shell", "run_terminal_cmd"),
    ("terminal", "run_terminal_cmd"),
    ("file_read", "read_file"),
    ("list_directory", "list_dir"),
    ("grep_search", "codebase_search"),
];

/// Create the tool registry for a project rooted at `root`.
///
/// Every file tool is confined to `root` and honors the configured
/// forbidden paths. The terminal tool uses the shadow build timeout as
/// its default.
pub fn default_registry(root: &Path, config: &AppConfig) -> ToolRegistry {
    let forbidden = config.autonomy.forbidden_paths.clone();
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(
        TerminalTool::new(root, ShellExecutor::factory())
            .with_timeout(config.shadow.build_timeout()),
    ));
    registry.register(Arc::new(ReadFileTool::new(root, forbidden.clone())));
    registry.register(Arc::new(ListDirTool::new(root, forbidden)));
    registry.register(Arc::new(CodebaseSearchTool::new(
        root,
        WorkspaceScanner::new(config.scanner.clone()),
    )));
    registry.register(Arc::new(WebSearchTool));

    for (alias, target) in TOOL_ALIASES {
        registry.alias(alias, target);
    }
    registry
}
