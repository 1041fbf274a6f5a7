//! `patchwright verify`: build proposed contents in a shadow workspace.

use super::{CmdResult, project_root};
use clap::Args;
use patchwright_config::AppConfig;
use patchwright_core::edit::ProposedEdit;
use patchwright_shadow::{ShadowVerifier, detect_build_system};
use patchwright_tools::ShellExecutor;
use std::path::PathBuf;

#[derive(Debug, Args)]
pub struct VerifyArgs {
    /// Project root
    #[arg(long, default_value = ".")]
    pub root: PathBuf,

    /// `relative/path=local/file`: build with `local/file` at `relative/path`
    #[arg(long = "edit", value_name = "REL=LOCAL", required = true)]
    pub edits: Vec<String>,
}

pub async fn run(args: VerifyArgs, config: &AppConfig) -> CmdResult {
    let root = project_root(&args.root)?;
    let edits = args
        .edits
        .iter()
        .map(|spec| parse_edit(spec))
        .collect::<CmdResult<Vec<_>>>()?;

    match detect_build_system(&root) {
        Some(system) => println!("🔍 Build system: {} ({})", system.name, system.command_line()),
        None => println!("🔍 No build system detected"),
    }

    let verifier = ShadowVerifier::new(config.shadow.clone(), ShellExecutor::factory());
    let report = verifier.verify(&edits, &root).await?;

    if report.passed {
        println!(
            "✅ {} ({:.1}s)",
            report.message,
            report.duration.as_secs_f64()
        );
        Ok(())
    } else {
        println!("❌ Shadow build failed ({:.1}s)", report.duration.as_secs_f64());
        println!("{}", report.message);
        Err("shadow verification failed".into())
    }
}

fn parse_edit(spec: &str) -> CmdResult<ProposedEdit> {
    let (relative, local) = spec
        .split_once('=')
        .filter(|(r, l)| !r.is_empty() && !l.is_empty())
        .ok_or_else(|| format!("--edit expects REL=LOCAL, got '{spec}'"))?;
    let content = std::fs::read_to_string(local)
        .map_err(|e| format!("cannot read {local}: {e}"))?;
    Ok(ProposedEdit::complete(relative, "", content))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_edit_reads_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("new.rs");
        std::fs::write(&local, "fn main() {}\n").unwrap();

        let edit = parse_edit(&format!("src/main.rs={}", local.display())).unwrap();
        assert_eq!(edit.path, PathBuf::from("src/main.rs"));
        assert_eq!(edit.content, "fn main() {}\n");
    }

    #[test]
    fn parse_edit_rejects_malformed_spec() {
        assert!(parse_edit("src/main.rs").is_err());
        assert!(parse_edit("=local.rs").is_err());
        assert!(parse_edit("src/main.rs=/does/not/exist").is_err());
    }
}
