//! Path validation: confines edits and file tools to a project root.
//!
//! Model-supplied paths are untrusted: they may be absolute, contain `..`,
//! or point into directories no edit should touch (`.git`).

use std::path::{Component, Path, PathBuf};

/// Error returned when path validation fails.
#[derive(Debug, thiserror::Error)]
pub enum PathValidationError {
    #[error("Path '{path}' is empty")]
    Empty { path: String },

    #[error("Path '{path}' is absolute and outside the project root")]
    OutsideRoot { path: String },

    #[error("Path '{path}' matches forbidden prefix '{pattern}'")]
    ForbiddenPath { path: String, pattern: String },

    #[error("Path traversal detected in '{path}'")]
    PathTraversal { path: String },

    #[error("Path '{path}' resolves through a symlink outside the project root")]
    SymlinkEscape { path: String },
}

/// Resolve a model-supplied path against `root`.
///
/// Accepts relative paths, or absolute paths already inside `root`.
/// Rejects `..` components, forbidden prefixes (compared on the relative
/// form), and existing ancestors that symlink out of the root.
///
/// Returns `(absolute, relative)` on success.
pub fn resolve_in_root(
    root: &Path,
    path: &str,
    forbidden_prefixes: &[String],
) -> Result<(PathBuf, PathBuf), PathValidationError> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(PathValidationError::Empty { path: path.into() });
    }

    let normalized = trimmed.replace('\\', "/");
    let candidate = Path::new(&normalized);

    let relative = if candidate.is_absolute() {
        candidate
            .strip_prefix(root)
            .map_err(|_| PathValidationError::OutsideRoot { path: path.into() })?
            .to_path_buf()
    } else {
        candidate.to_path_buf()
    };

    let mut clean = PathBuf::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(PathValidationError::PathTraversal { path: path.into() });
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(PathValidationError::OutsideRoot { path: path.into() });
            }
        }
    }
    if clean.as_os_str().is_empty() {
        return Err(PathValidationError::Empty { path: path.into() });
    }

    let clean_str = clean.to_string_lossy().replace('\\', "/").to_lowercase();
    for forbidden in forbidden_prefixes {
        let prefix = forbidden.trim_matches('/').to_lowercase();
        if prefix.is_empty() {
            continue;
        }
        if clean_str == prefix || clean_str.starts_with(&format!("{prefix}/")) {
            return Err(PathValidationError::ForbiddenPath {
                path: path.into(),
                pattern: forbidden.clone(),
            });
        }
    }

    let absolute = root.join(&clean);
    check_symlink_escape(root, &absolute, path)?;
    Ok((absolute, clean))
}

/// The deepest existing ancestor of `absolute` must canonicalize into `root`.
fn check_symlink_escape(root: &Path, absolute: &Path, raw: &str) -> Result<(), PathValidationError> {
    let Ok(canonical_root) = root.canonicalize() else {
        // Root does not exist yet; nothing can escape through it
        return Ok(());
    };
    let mut existing = absolute.to_path_buf();
    loop {
        if existing.exists() {
            break;
        }
        if !existing.pop() {
            return Ok(());
        }
    }
    match existing.canonicalize() {
        Ok(resolved) if resolved.starts_with(&canonical_root) => Ok(()),
        Ok(_) => Err(PathValidationError::SymlinkEscape { path: raw.into() }),
        Err(_) => Ok(()),
    }
}
