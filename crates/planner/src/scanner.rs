//! Project-wide literal search.

use ignore::WalkBuilder;
use patchwright_config::ScannerConfig;
use patchwright_core::plan::{FileMatch, SearchTarget};
use regex::{NoExpand, Regex};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Extensions always treated as text.
const TEXT_EXTENSIONS: &[&str] = &[
    "rs", "toml", "swift", "m", "mm", "h", "c", "cc", "cpp", "hpp", "go", "py", "rb", "js",
    "jsx", "ts", "tsx", "mjs", "cjs", "java", "kt", "kts", "scala", "cs", "php", "sh", "bash",
    "zsh", "fish", "html", "htm", "css", "scss", "sass", "less", "vue", "svelte", "json",
    "yaml", "yml", "xml", "plist", "md", "markdown", "txt", "rst", "ini", "cfg", "conf", "sql",
    "graphql", "proto", "gradle", "cmake", "lua", "dart", "ex", "exs", "erl", "hs", "ml",
    "zig", "nim", "r", "jl", "pl", "tf", "env", "lock", "csv",
];

/// Directories that are opaque bundles rather than source folders.
const PACKAGE_SUFFIXES: &[&str] = &[
    ".app",
    ".xcodeproj",
    ".xcworkspace",
    ".framework",
    ".bundle",
    ".xcassets",
    ".playground",
];

/// Bytes inspected for NUL when the extension is unknown.
const SNIFF_BYTES: usize = 8192;

/// Compiled form of a [`SearchTarget`].
///
/// Word boundaries and case folding are Unicode-aware, so identifiers
/// such as `café` match as whole words.
#[derive(Debug, Clone)]
pub struct Matcher {
    regex: Regex,
}

impl Matcher {
    /// `None` for an empty pattern.
    pub fn new(target: &SearchTarget) -> Option<Self> {
        if target.pattern.is_empty() {
            return None;
        }
        let is_word = |c: char| c.is_alphanumeric() || c == '_';

        let mut source = String::new();
        if !target.case_sensitive {
            source.push_str("(?i)");
        }
        if target.whole_word && target.pattern.starts_with(is_word) {
            source.push_str(r"\b");
        }
        source.push_str(&regex::escape(&target.pattern));
        if target.whole_word && target.pattern.ends_with(is_word) {
            source.push_str(r"\b");
        }

        match Regex::new(&source) {
            Ok(regex) => Some(Self { regex }),
            Err(e) => {
                warn!(pattern = %target.pattern, error = %e, "Unusable search pattern");
                None
            }
        }
    }

    /// Non-overlapping occurrences.
    pub fn count(&self, text: &str) -> usize {
        self.regex.find_iter(text).count()
    }

    pub fn replace_all(&self, text: &str, replacement: &str) -> String {
        self.regex.replace_all(text, NoExpand(replacement)).into_owned()
    }
}

/// Enumerates project files and counts literal matches in the text ones.
#[derive(Debug, Clone, Default)]
pub struct WorkspaceScanner {
    config: ScannerConfig,
}

impl WorkspaceScanner {
    pub fn new(config: ScannerConfig) -> Self {
        Self { config }
    }

    /// All non-hidden files under `root`, relative and sorted, skipping
    /// configured directories and package bundles.
    pub fn list_files(&self, root: &Path) -> Vec<PathBuf> {
        let skip_dirs = self.config.skip_dirs.clone();
        let walker = WalkBuilder::new(root)
            .hidden(true)
            .git_ignore(true)
            .filter_entry(move |entry| {
                if entry.depth() == 0 || !entry.file_type().is_some_and(|ft| ft.is_dir()) {
                    return true;
                }
                let name = entry.file_name().to_string_lossy();
                !skip_dirs.iter().any(|d| d == name.as_ref()) && !is_package_dir(&name)
            })
            .build();

        let mut files: Vec<PathBuf> = walker
            .flatten()
            .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
            .filter_map(|entry| {
                entry
                    .path()
                    .strip_prefix(root)
                    .ok()
                    .map(Path::to_path_buf)
            })
            .collect();
        files.sort();
        files
    }

    /// Contents of `path` if it is a text file: a known extension, or no
    /// NUL bytes up front, and in every case UTF-8 under the size cap.
    pub fn read_text(&self, path: &Path) -> Option<String> {
        let meta = std::fs::metadata(path).ok()?;
        if !meta.is_file() || meta.len() > self.config.max_file_bytes {
            return None;
        }
        let bytes = std::fs::read(path).ok()?;
        if !self.has_text_extension(path) && bytes.iter().take(SNIFF_BYTES).any(|b| *b == 0) {
            return None;
        }
        String::from_utf8(bytes).ok()
    }

    fn has_text_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .is_some_and(|ext| {
                TEXT_EXTENSIONS.contains(&ext.as_str())
                    || self
                        .config
                        .extra_text_extensions
                        .iter()
                        .any(|x| x.trim_start_matches('.').eq_ignore_ascii_case(&ext))
            })
    }

    /// Files under `root` containing `pattern` as a substring, with counts.
    pub fn scan_for_matches(&self, pattern: &str, root: &Path, case_sensitive: bool) -> Vec<FileMatch> {
        let target = SearchTarget {
            case_sensitive,
            ..SearchTarget::literal(pattern)
        };
        self.scan_target(&target, root)
    }

    /// Like [`scan_for_matches`](Self::scan_for_matches), honoring every
    /// flag of the target.
    pub fn scan_target(&self, target: &SearchTarget, root: &Path) -> Vec<FileMatch> {
        let files = self.list_files(root);
        self.scan_files(target, root, &files)
    }

    /// Count matches in an explicit list of root-relative files.
    pub fn scan_files(&self, target: &SearchTarget, root: &Path, files: &[PathBuf]) -> Vec<FileMatch> {
        let Some(matcher) = Matcher::new(target) else {
            return Vec::new();
        };

        let matches: Vec<FileMatch> = files
            .iter()
            .filter_map(|rel| {
                let text = self.read_text(&root.join(rel))?;
                let occurrences = matcher.count(&text);
                (occurrences > 0).then(|| FileMatch {
                    path: rel.clone(),
                    occurrences,
                })
            })
            .collect();

        debug!(
            pattern = %target.pattern,
            scanned = files.len(),
            matched = matches.len(),
            "Workspace scan finished"
        );
        matches
    }
}

fn is_package_dir(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    PACKAGE_SUFFIXES.iter().any(|s| lower.ends_with(s))
}
