//! Process executor and linter seams.
//!
//! Both are external collaborators: the shadow verifier and the terminal
//! tool talk to a [`ProcessExecutor`], the edit pipeline optionally to a
//! [`Linter`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::ProcessError;

/// A command to run in a working directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.into(),
            env: HashMap::new(),
            timeout: None,
        }
    }

    /// Run `command` through the platform shell.
    pub fn shell(command: &str, cwd: impl Into<PathBuf>) -> Self {
        if cfg!(target_os = "windows") {
            Self::new("cmd", cwd).args(["/C", command])
        } else {
            Self::new("sh", cwd).args(["-c", command])
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// One line of streamed process output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOutput {
    /// `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// stdout and stderr interleaved in arrival order
    pub combined: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs external commands.
///
/// An executor instance runs one command at a time and answers a second
/// concurrent request with [`ProcessError::Busy`].
#[async_trait]
pub trait ProcessExecutor: Send + Sync {
    /// Run a command, forwarding each output line to `lines` if given.
    async fn execute(
        &self,
        spec: CommandSpec,
        lines: Option<mpsc::UnboundedSender<OutputLine>>,
    ) -> Result<CommandOutput, ProcessError>;

    /// Blocking variant for short commands.
    fn execute_sync(&self, spec: CommandSpec) -> Result<CommandOutput, ProcessError>;
}

/// Produces a fresh executor per use, since an executor runs one command
/// at a time.
pub type ExecutorFactory = Arc<dyn Fn() -> Arc<dyn ProcessExecutor> + Send + Sync>;

/// Something a linter found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LintIssue {
    pub path: PathBuf,
    pub line: Option<usize>,
    pub message: String,
}

/// Optional, workspace-dependent linter. `None` means "not available here".
#[async_trait]
pub trait Linter: Send + Sync {
    async fn validate(&self, files: &[PathBuf], workspace: &Path) -> Option<Vec<LintIssue>>;
}
