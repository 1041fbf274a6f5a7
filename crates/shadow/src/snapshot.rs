//! Populating a shadow copy of a project.
//!
//! A copy-on-write clone through `cp` is tried first where the platform
//! supports one; otherwise, or if it fails, the tree is copied file by file.
//! Top-level names in the exclude list are skipped either way.

use patchwright_core::error::VerificationError;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tracing::{debug, warn};

pub(crate) async fn populate(
    root: &Path,
    dest: &Path,
    excludes: &[String],
    prefer_clone: bool,
) -> Result<(), VerificationError> {
    let snapshot_err = |e: std::io::Error| VerificationError::Snapshot {
        root: root.display().to_string(),
        reason: e.to_string(),
    };

    let sources = top_level_entries(root, excludes).await.map_err(snapshot_err)?;
    tokio::fs::create_dir_all(dest).await.map_err(snapshot_err)?;

    if prefer_clone && cfg!(unix) && !sources.is_empty() {
        match clone_entries(&sources, dest).await {
            Ok(true) => {
                debug!(root = %root.display(), "Cloned project into shadow workspace");
                return Ok(());
            }
            Ok(false) => warn!(root = %root.display(), "Clone failed, falling back to copy"),
            Err(e) => warn!(root = %root.display(), error = %e, "Clone unavailable, falling back to copy"),
        }
        // A failed clone may leave partial output behind
        tokio::fs::remove_dir_all(dest).await.map_err(snapshot_err)?;
        tokio::fs::create_dir_all(dest).await.map_err(snapshot_err)?;
    }

    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || {
        for source in sources {
            let Some(name) = source.file_name() else {
                continue;
            };
            copy_entry(&source, &dest.join(name))?;
        }
        Ok::<_, std::io::Error>(())
    })
    .await
    .map_err(|e| VerificationError::Snapshot {
        root: root.display().to_string(),
        reason: e.to_string(),
    })?
    .map_err(snapshot_err)?;

    debug!(root = %root.display(), "Copied project into shadow workspace");
    Ok(())
}

async fn top_level_entries(root: &Path, excludes: &[String]) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(root).await?;
    let mut sources = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        if excludes.iter().any(|e| name.to_string_lossy() == e.as_str()) {
            continue;
        }
        sources.push(entry.path());
    }
    sources.sort();
    Ok(sources)
}

async fn clone_entries(sources: &[PathBuf], dest: &Path) -> std::io::Result<bool> {
    let mut cmd = tokio::process::Command::new("cp");
    if cfg!(target_os = "macos") {
        cmd.arg("-c");
    } else {
        cmd.arg("--reflink=auto");
    }
    let status = cmd
        .arg("-R")
        .args(sources)
        .arg(dest)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await?;
    Ok(status.success())
}

fn copy_entry(from: &Path, to: &Path) -> std::io::Result<()> {
    let file_type = std::fs::symlink_metadata(from)?.file_type();
    if file_type.is_symlink() {
        copy_symlink(from, to)
    } else if file_type.is_dir() {
        std::fs::create_dir_all(to)?;
        for entry in std::fs::read_dir(from)? {
            let entry = entry?;
            copy_entry(&entry.path(), &to.join(entry.file_name()))?;
        }
        Ok(())
    } else {
        std::fs::copy(from, to).map(|_| ())
    }
}

#[cfg(unix)]
fn copy_symlink(from: &Path, to: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(std::fs::read_link(from)?, to)
}

#[cfg(not(unix))]
fn copy_symlink(from: &Path, to: &Path) -> std::io::Result<()> {
    if from.is_dir() {
        std::fs::create_dir_all(to)
    } else {
        std::fs::copy(from, to).map(|_| ())
    }
}
