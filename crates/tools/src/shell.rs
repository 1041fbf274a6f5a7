//! Process execution: the [`ShellExecutor`] and the terminal tool on top of it.

use async_trait::async_trait;
use patchwright_core::error::{ProcessError, ToolError};
use patchwright_core::process::{
    CommandOutput, CommandSpec, ExecutorFactory, OutputLine, OutputStream, ProcessExecutor,
};
use patchwright_core::tool::{Tool, ToolCallRequest, ToolResult};
use patchwright_security::resolve_in_root;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Runs commands with `tokio::process`, one at a time.
///
/// Output is streamed line by line. A command past its timeout is killed
/// and reported as [`ProcessError::Timeout`].
#[derive(Debug, Default)]
pub struct ShellExecutor {
    busy: AtomicBool,
}

/// Clears the busy flag when a command ends, however it ends.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ShellExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// A factory handing out a fresh executor per call.
    pub fn factory() -> ExecutorFactory {
        Arc::new(|| Arc::new(ShellExecutor::new()) as Arc<dyn ProcessExecutor>)
    }

    fn acquire(&self) -> Result<BusyGuard<'_>, ProcessError> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| BusyGuard(&self.busy))
            .map_err(|_| ProcessError::Busy)
    }

    fn command(spec: &CommandSpec) -> Command {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&spec.cwd)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

fn forward_lines<R>(stream: R, kind: OutputStream, tx: mpsc::UnboundedSender<OutputLine>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        // Drain to EOF; invalid UTF-8 is replaced, never fatal.
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        let mut forwarding = true;
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            if !forwarding {
                continue;
            }
            if buf.last() == Some(&b'\n') {
                buf.pop();
                if buf.last() == Some(&b'\r') {
                    buf.pop();
                }
            }
            let text = String::from_utf8_lossy(&buf).into_owned();
            forwarding = tx.send(OutputLine { stream: kind, text }).is_ok();
        }
    });
}

async fn collect(
    mut rx: mpsc::UnboundedReceiver<OutputLine>,
    listener: Option<mpsc::UnboundedSender<OutputLine>>,
) -> CommandOutput {
    let mut output = CommandOutput {
        exit_code: None,
        stdout: String::new(),
        stderr: String::new(),
        combined: String::new(),
    };
    while let Some(line) = rx.recv().await {
        let target = match line.stream {
            OutputStream::Stdout => &mut output.stdout,
            OutputStream::Stderr => &mut output.stderr,
        };
        target.push_str(&line.text);
        target.push('\n');
        output.combined.push_str(&line.text);
        output.combined.push('\n');
        if let Some(listener) = &listener {
            let _ = listener.send(line);
        }
    }
    output
}

#[async_trait]
impl ProcessExecutor for ShellExecutor {
    async fn execute(
        &self,
        spec: CommandSpec,
        lines: Option<mpsc::UnboundedSender<OutputLine>>,
    ) -> Result<CommandOutput, ProcessError> {
        let _busy = self.acquire()?;
        let command_line = spec.display();
        debug!(command = %command_line, cwd = %spec.cwd.display(), "Spawning process");

        let mut child = Self::command(&spec)
            .spawn()
            .map_err(|e| ProcessError::Spawn {
                command: command_line.clone(),
                reason: e.to_string(),
            })?;

        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, OutputStream::Stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, OutputStream::Stderr, tx);
        }

        let run = async { tokio::join!(collect(rx, lines), child.wait()) };
        let (mut output, status) = match spec.timeout {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(done) => done,
                Err(_) => {
                    warn!(command = %command_line, timeout_secs = limit.as_secs(), "Process timed out");
                    // kill_on_drop reaps the child when it goes out of scope
                    return Err(ProcessError::Timeout {
                        command: command_line,
                        timeout_secs: limit.as_secs(),
                    });
                }
            },
            None => run.await,
        };

        let status = status.map_err(|e| ProcessError::Io {
            command: command_line.clone(),
            reason: e.to_string(),
        })?;
        output.exit_code = status.code();
        debug!(command = %command_line, exit_code = ?output.exit_code, "Process finished");
        Ok(output)
    }

    fn execute_sync(&self, spec: CommandSpec) -> Result<CommandOutput, ProcessError> {
        let _busy = self.acquire()?;
        let command_line = spec.display();
        let out = std::process::Command::new(&spec.program)
            .args(&spec.args)
            .current_dir(&spec.cwd)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| ProcessError::Spawn {
                command: command_line,
                reason: e.to_string(),
            })?;

        let stdout = String::from_utf8_lossy(&out.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&out.stderr).into_owned();
        Ok(CommandOutput {
            exit_code: out.status.code(),
            combined: format!("{stdout}{stderr}"),
            stdout,
            stderr,
        })
    }
}

/// Runs a terminal command in the project root.
///
/// Approval for commands outside the allowlist is the task loop's job;
/// by the time a call reaches this tool it has been allowed.
pub struct TerminalTool {
    root: PathBuf,
    executors: ExecutorFactory,
    default_timeout: Option<Duration>,
}

impl TerminalTool {
    pub fn new(root: impl Into<PathBuf>, executors: ExecutorFactory) -> Self {
        Self {
            root: root.into(),
            executors,
            default_timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }
}

#[async_trait]
impl Tool for TerminalTool {
    fn name(&self) -> &str {
        "run_terminal_cmd"
    }

    fn description(&self) -> &str {
        "Run a shell command in the project and return its output and exit code."
    }

    async fn execute(&self, call: &ToolCallRequest) -> Result<ToolResult, ToolError> {
        let command = call.require_str("command")?;
        let cwd = match call.str_arg("cwd") {
            Some(dir) => {
                resolve_in_root(&self.root, dir, &[])
                    .map_err(|e| ToolError::PermissionDenied {
                        tool_name: self.name().into(),
                        reason: e.to_string(),
                    })?
                    .0
            }
            None => self.root.clone(),
        };
        let timeout = call
            .input
            .get("timeout_secs")
            .and_then(|v| v.as_u64())
            .map(Duration::from_secs)
            .or(self.default_timeout);

        let spec = CommandSpec::shell(command, cwd).with_timeout(timeout);
        let executor = (self.executors)();
        let output = executor
            .execute(spec, None)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: self.name().into(),
                reason: e.to_string(),
            })?;

        let data = serde_json::json!({ "exit_code": output.exit_code });
        let mut result = if output.success() {
            ToolResult::ok(&call.id, output.combined.trim_end())
        } else {
            let code = output
                .exit_code
                .map_or_else(|| "signal".to_string(), |c| c.to_string());
            warn!(command = %command, exit_code = %code, "Command failed");
            ToolResult::failed(
                &call.id,
                format!("[exit code: {code}]\n{}", output.combined.trim_end()),
            )
        };
        result.data = Some(data);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(input: serde_json::Value) -> ToolCallRequest {
        let serde_json::Value::Object(input) = input else {
            panic!("object expected");
        };
        ToolCallRequest::new("1", "run_terminal_cmd", input)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn streams_and_collects_output() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let spec = CommandSpec::shell("echo out; echo err >&2; exit 3", dir.path());

        let output = ShellExecutor::new().execute(spec, Some(tx)).await.unwrap();

        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
        assert!(!output.success());

        let mut streamed = Vec::new();
        while let Ok(line) = rx.try_recv() {
            streamed.push(line.text);
        }
        streamed.sort();
        assert_eq!(streamed, ["err", "out"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn invalid_utf8_output_is_drained_to_the_end() {
        let dir = tempfile::tempdir().unwrap();
        let spec = CommandSpec::shell(
            "printf '\\377\\n'; head -c 300000 /dev/zero | tr '\\0' a; echo; exit 3",
            dir.path(),
        )
        .with_timeout(Some(Duration::from_secs(5)));

        let output = ShellExecutor::new().execute(spec, None).await.unwrap();

        assert_eq!(output.exit_code, Some(3));
        assert!(output.stdout.starts_with('\u{FFFD}'));
        assert_eq!(output.stdout.matches('a').count(), 300_000);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn second_concurrent_command_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let executor = ShellExecutor::new();
        let slow = CommandSpec::shell("sleep 0.3", dir.path());
        let fast = CommandSpec::shell("echo hi", dir.path());

        let (first, second) = tokio::join!(executor.execute(slow, None), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            executor.execute(fast, None).await
        });

        assert!(first.unwrap().success());
        assert!(matches!(second, Err(ProcessError::Busy)));
        // Free again afterwards
        let again = CommandSpec::shell("echo hi", dir.path());
        assert!(executor.execute(again, None).await.is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_kills_command() {
        let dir = tempfile::tempdir().unwrap();
        let spec = CommandSpec::shell("sleep 5", dir.path())
            .with_timeout(Some(Duration::from_millis(100)));
        let started = std::time::Instant::now();

        let err = ShellExecutor::new().execute(spec, None).await.unwrap_err();

        assert!(matches!(err, ProcessError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let spec = CommandSpec::new("definitely-not-a-real-program-xyz", dir.path());
        let err = ShellExecutor::new().execute(spec, None).await.unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn sync_variant_runs_short_commands() {
        let dir = tempfile::tempdir().unwrap();
        let output = ShellExecutor::new()
            .execute_sync(CommandSpec::shell("printf hi", dir.path()))
            .unwrap();
        assert!(output.success());
        assert_eq!(output.stdout, "hi");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn terminal_tool_runs_in_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "x").unwrap();
        let tool = TerminalTool::new(dir.path(), ShellExecutor::factory());

        let result = tool.execute(&call(serde_json::json!({"command": "ls"}))).await.unwrap();
        assert!(result.success);
        assert!(result.output.contains("marker.txt"));
        assert_eq!(result.call_id, "1");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn terminal_tool_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let tool = TerminalTool::new(dir.path(), ShellExecutor::factory());
        let result = tool
            .execute(&call(serde_json::json!({"command": "exit 2"})))
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.output.starts_with("[exit code: 2]"));
        assert_eq!(result.data.unwrap()["exit_code"], 2);
    }

    #[tokio::test]
    async fn terminal_tool_rejects_escaping_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let tool = TerminalTool::new(dir.path(), ShellExecutor::factory());
        let result = tool
            .execute(&call(serde_json::json!({"command": "ls", "cwd": "../.."})))
            .await;
        assert!(matches!(result, Err(ToolError::PermissionDenied { .. })));
    }

    #[tokio::test]
    async fn terminal_tool_requires_command() {
        let dir = tempfile::tempdir().unwrap();
        let tool = TerminalTool::new(dir.path(), ShellExecutor::factory());
        let result = tool.execute(&call(serde_json::json!({}))).await;
        assert!(matches!(result, Err(ToolError::InvalidArguments(_))));
    }
}
