//! The shadow workspace verifier.

use crate::build::{BuildSystem, detect_build_system};
use crate::snapshot;
use chrono::Utc;
use patchwright_config::ShadowConfig;
use patchwright_core::edit::ProposedEdit;
use patchwright_core::error::{ProcessError, VerificationError};
use patchwright_core::event::{DomainEvent, EventBus};
use patchwright_core::process::{CommandSpec, ExecutorFactory};
use patchwright_security::resolve_in_root;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Outcome of one verification.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    pub passed: bool,
    pub message: String,
    /// `None` when no build ran
    pub build_system: Option<String>,
    pub duration: Duration,
}

impl VerificationReport {
    fn skipped(message: &str, duration: Duration) -> Self {
        Self {
            passed: true,
            message: message.into(),
            build_system: None,
            duration,
        }
    }
}

/// Builds proposed edits in a disposable copy of the project.
///
/// Verifications of the same project root queue in FIFO order behind one
/// lock, so at most one shadow copy per root is ever live. Distinct roots
/// verify concurrently. The copy is removed when verification ends, however
/// it ends.
pub struct ShadowVerifier {
    config: ShadowConfig,
    executors: ExecutorFactory,
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
    event_bus: Option<Arc<EventBus>>,
}

impl ShadowVerifier {
    pub fn new(config: ShadowConfig, executors: ExecutorFactory) -> Self {
        Self {
            config,
            executors,
            locks: Mutex::new(HashMap::new()),
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Copy `root`, write `edits` into the copy, build it once.
    ///
    /// `Ok` with `passed == false` is a build failure; `Err` means the
    /// shadow copy itself could not be prepared. The real project is never
    /// touched in either case.
    pub async fn verify(
        &self,
        edits: &[ProposedEdit],
        root: &Path,
    ) -> Result<VerificationReport, VerificationError> {
        let started = Instant::now();
        if !self.config.enabled {
            return Ok(VerificationReport::skipped(
                "shadow verification disabled",
                started.elapsed(),
            ));
        }

        let root = tokio::fs::canonicalize(root)
            .await
            .map_err(|e| VerificationError::Snapshot {
                root: root.display().to_string(),
                reason: e.to_string(),
            })?;

        let lock = self.root_lock(&root).await;
        let outcome = {
            let _guard = lock.lock().await;
            self.build_locked(edits, &root).await
        };
        drop(lock);
        self.prune_locks().await;

        let duration = started.elapsed();
        let report = match outcome {
            Ok(Some((system, passed, message))) => VerificationReport {
                passed,
                message,
                build_system: Some(system.name.to_string()),
                duration,
            },
            Ok(None) => VerificationReport::skipped("no build system detected", duration),
            Err(e) => {
                self.publish(&root, false, duration);
                return Err(e);
            }
        };

        info!(
            root = %root.display(),
            passed = report.passed,
            build_system = report.build_system.as_deref().unwrap_or("none"),
            duration_ms = duration.as_millis() as u64,
            "Shadow verification finished"
        );
        self.publish(&root, report.passed, duration);
        Ok(report)
    }

    async fn root_lock(&self, root: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(root.to_path_buf()).or_default().clone()
    }

    /// Forget roots nobody holds or waits on.
    async fn prune_locks(&self) {
        self.locks
            .lock()
            .await
            .retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    /// Runs with the root lock held; the scratch copy never outlives it.
    async fn build_locked(
        &self,
        edits: &[ProposedEdit],
        root: &Path,
    ) -> Result<Option<(&'static BuildSystem, bool, String)>, VerificationError> {
        debug!(root = %root.display(), edits = edits.len(), "Shadow verification started");
        let scratch = self.scratch_dir(root)?;
        let shadow_root = scratch.path().join("workspace");
        let outcome = self.build_in_shadow(edits, root, &shadow_root).await;

        if let Err(e) = scratch.close() {
            warn!(root = %root.display(), error = %e, "Failed to remove shadow workspace");
        }
        outcome
    }

    fn scratch_dir(&self, root: &Path) -> Result<tempfile::TempDir, VerificationError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("patchwright-shadow-");
        match &self.config.scratch_dir {
            Some(dir) => builder.tempdir_in(dir),
            None => builder.tempdir(),
        }
        .map_err(|e| VerificationError::Snapshot {
            root: root.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// `None` when there is nothing to build.
    async fn build_in_shadow(
        &self,
        edits: &[ProposedEdit],
        root: &Path,
        shadow_root: &Path,
    ) -> Result<Option<(&'static BuildSystem, bool, String)>, VerificationError> {
        snapshot::populate(
            root,
            shadow_root,
            &self.config.copy_excludes,
            self.config.prefer_clone,
        )
        .await?;

        for edit in edits {
            write_edit(shadow_root, edit).await?;
        }

        let Some(system) = detect_build_system(shadow_root) else {
            debug!(root = %root.display(), "No build system detected");
            return Ok(None);
        };

        let command = system.command_line();
        let spec = CommandSpec::new(system.program, shadow_root)
            .args(system.args.iter().copied())
            .with_timeout(self.config.build_timeout());
        debug!(command = %command, "Running shadow build");

        let executor = (self.executors)();
        let (passed, message) = match executor.execute(spec, None).await {
            Ok(output) if output.success() => (true, format!("`{command}` succeeded")),
            Ok(output) => {
                let status = match output.exit_code {
                    Some(code) => format!("exit code {code}"),
                    None => "termination by signal".to_string(),
                };
                (
                    false,
                    format!(
                        "`{command}` failed with {status}\n{}",
                        tail(&output.combined, self.config.output_tail_chars)
                    ),
                )
            }
            Err(ProcessError::Spawn { command, reason }) => {
                return Err(VerificationError::Spawn(format!("{command}: {reason}")));
            }
            Err(e) => (false, e.to_string()),
        };
        Ok(Some((system, passed, message)))
    }

    fn publish(&self, root: &Path, passed: bool, duration: Duration) {
        if let Some(bus) = &self.event_bus {
            bus.publish(DomainEvent::VerificationFinished {
                root: root.display().to_string(),
                passed,
                duration_ms: duration.as_millis() as u64,
                timestamp: Utc::now(),
            });
        }
    }
}

async fn write_edit(shadow_root: &Path, edit: &ProposedEdit) -> Result<(), VerificationError> {
    let (target, _) = resolve_in_root(shadow_root, &edit.path.to_string_lossy(), &[])
        .map_err(|e| VerificationError::EscapingPath(e.to_string()))?;
    let write_err = |e: std::io::Error| VerificationError::Write {
        path: edit.display_path(),
        reason: e.to_string(),
    };
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }
    tokio::fs::write(&target, &edit.content).await.map_err(write_err)
}

/// The last `max_chars` characters of `text`.
fn tail(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let start = text
        .char_indices()
        .nth(total - max_chars)
        .map(|(i, _)| i)
        .unwrap_or(0);
    format!("...{}", &text[start..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use patchwright_core::process::{CommandOutput, OutputLine, ProcessExecutor};
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    /// Records every build and answers with a scripted result.
    #[derive(Default)]
    struct ScriptedExecutor {
        exit_code: Option<i32>,
        output: String,
        timeout: bool,
        delay_ms: u64,
        specs: StdMutex<Vec<CommandSpec>>,
        /// Contents of `src/main.rs` inside the shadow copy at build time
        seen: StdMutex<Vec<String>>,
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    impl ScriptedExecutor {
        fn passing() -> Self {
            Self {
                exit_code: Some(0),
                ..Default::default()
            }
        }

        fn calls(&self) -> usize {
            self.specs.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ProcessExecutor for ScriptedExecutor {
        async fn execute(
            &self,
            spec: CommandSpec,
            _lines: Option<mpsc::UnboundedSender<OutputLine>>,
        ) -> Result<CommandOutput, ProcessError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            if let Ok(content) = std::fs::read_to_string(spec.cwd.join("src/main.rs")) {
                self.seen.lock().unwrap().push(content);
            }
            self.specs.lock().unwrap().push(spec.clone());
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            if self.timeout {
                return Err(ProcessError::Timeout {
                    command: spec.display(),
                    timeout_secs: 1,
                });
            }
            Ok(CommandOutput {
                exit_code: self.exit_code,
                stdout: self.output.clone(),
                stderr: String::new(),
                combined: self.output.clone(),
            })
        }

        fn execute_sync(&self, _spec: CommandSpec) -> Result<CommandOutput, ProcessError> {
            unreachable!("shadow builds are async")
        }
    }

    fn verifier(executor: Arc<ScriptedExecutor>, config: ShadowConfig) -> ShadowVerifier {
        ShadowVerifier::new(
            config,
            Arc::new(move || executor.clone() as Arc<dyn ProcessExecutor>),
        )
    }

    fn config() -> ShadowConfig {
        ShadowConfig {
            prefer_clone: false,
            ..Default::default()
        }
    }

    fn cargo_project() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "[package]\nname = \"x\"\n").unwrap();
        std::fs::write(dir.path().join("src/main.rs"), "fn main() {}\n").unwrap();
        dir
    }

    fn edit(content: &str) -> ProposedEdit {
        ProposedEdit::complete("src/main.rs", "fn main() {}\n", content)
    }

    #[tokio::test]
    async fn no_manifest_passes_without_spawning() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "just text").unwrap();
        let executor = Arc::new(ScriptedExecutor::passing());

        let report = verifier(executor.clone(), config())
            .verify(&[], dir.path())
            .await
            .unwrap();

        assert!(report.passed);
        assert_eq!(report.message, "no build system detected");
        assert!(report.build_system.is_none());
        assert_eq!(executor.calls(), 0);
    }

    #[tokio::test]
    async fn builds_edited_copy_and_leaves_project_alone() {
        let dir = cargo_project();
        let executor = Arc::new(ScriptedExecutor::passing());

        let report = verifier(executor.clone(), config())
            .verify(&[edit("fn main() { println!(\"v2\"); }\n")], dir.path())
            .await
            .unwrap();

        assert!(report.passed);
        assert_eq!(report.build_system.as_deref(), Some("cargo"));
        let specs = executor.specs.lock().unwrap().clone();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].display(), "cargo build");
        assert_eq!(specs[0].timeout, Some(Duration::from_secs(600)));
        assert_eq!(
            executor.seen.lock().unwrap().as_slice(),
            ["fn main() { println!(\"v2\"); }\n"]
        );
        assert_eq!(
            std::fs::read_to_string(dir.path().join("src/main.rs")).unwrap(),
            "fn main() {}\n"
        );
    }

    #[tokio::test]
    async fn shadow_copy_is_deleted_after_failed_build() {
        let dir = cargo_project();
        let executor = Arc::new(ScriptedExecutor {
            exit_code: Some(101),
            output: format!("{}error[E0425]: cannot find value", "noise\n".repeat(2000)),
            ..Default::default()
        });
        let cfg = ShadowConfig {
            output_tail_chars: 40,
            ..config()
        };

        let report = verifier(executor.clone(), cfg)
            .verify(&[edit("fn main() { oops }\n")], dir.path())
            .await
            .unwrap();

        assert!(!report.passed);
        assert!(report.message.starts_with("`cargo build` failed with exit code 101"));
        assert!(report.message.ends_with("error[E0425]: cannot find value"));
        assert!(report.message.len() < 200);

        let cwd = executor.specs.lock().unwrap()[0].cwd.clone();
        assert!(!cwd.exists(), "shadow copy survived: {}", cwd.display());
    }

    #[tokio::test]
    async fn shadow_copy_is_deleted_after_write_error() {
        let dir = cargo_project();
        let scratch = tempfile::tempdir().unwrap();
        let cfg = ShadowConfig {
            scratch_dir: Some(scratch.path().to_path_buf()),
            ..config()
        };
        let escaping = ProposedEdit::complete("../outside.rs", "", "fn outside() {}\n");

        let err = verifier(Arc::new(ScriptedExecutor::passing()), cfg)
            .verify(&[escaping], dir.path())
            .await
            .unwrap_err();

        assert!(matches!(err, VerificationError::EscapingPath(_)));
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn timeout_is_a_failed_build() {
        let dir = cargo_project();
        let executor = Arc::new(ScriptedExecutor {
            timeout: true,
            ..Default::default()
        });
        let report = verifier(executor, config()).verify(&[], dir.path()).await.unwrap();
        assert!(!report.passed);
        assert!(report.message.contains("timed out"));
    }

    #[tokio::test]
    async fn same_root_verifications_queue() {
        let dir = cargo_project();
        let executor = Arc::new(ScriptedExecutor {
            exit_code: Some(0),
            delay_ms: 150,
            ..Default::default()
        });
        let verifier = verifier(executor.clone(), config());
        let first = [edit("fn main() { a(); }\n")];
        let second = [edit("fn main() { b(); }\n")];

        let (a, b) = tokio::join!(
            verifier.verify(&first, dir.path()),
            verifier.verify(&second, dir.path()),
        );
        assert!(a.unwrap().passed && b.unwrap().passed);
        assert_eq!(executor.calls(), 2);
        assert_eq!(executor.max_active.load(Ordering::SeqCst), 1);
        // Each build saw its own edit, never the other one's
        let mut seen = executor.seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, ["fn main() { a(); }\n", "fn main() { b(); }\n"]);
        assert!(verifier.locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn distinct_roots_run_concurrently() {
        let (one, two) = (cargo_project(), cargo_project());
        let executor = Arc::new(ScriptedExecutor {
            exit_code: Some(0),
            delay_ms: 300,
            ..Default::default()
        });
        let verifier = verifier(executor.clone(), config());

        let (a, b) = tokio::join!(verifier.verify(&[], one.path()), verifier.verify(&[], two.path()));
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(executor.max_active.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn disabled_verifier_passes() {
        let cfg = ShadowConfig {
            enabled: false,
            ..config()
        };
        let report = verifier(Arc::new(ScriptedExecutor::passing()), cfg)
            .verify(&[], Path::new("/definitely/not/here"))
            .await
            .unwrap();
        assert!(report.passed);
    }

    #[tokio::test]
    async fn publishes_verification_event() {
        let dir = tempfile::tempdir().unwrap();
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();

        verifier(Arc::new(ScriptedExecutor::passing()), config())
            .with_event_bus(bus.clone())
            .verify(&[], dir.path())
            .await
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert!(matches!(
            event.as_ref(),
            DomainEvent::VerificationFinished { passed: true, .. }
        ));
    }

    #[test]
    fn tail_keeps_char_boundaries() {
        assert_eq!(tail("short", 10), "short");
        assert_eq!(tail("ääääbbb", 3), "...bbb");
        assert_eq!(tail("abcäö", 2), "...äö");
    }
}
