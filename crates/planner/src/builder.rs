//! Natural-language instruction → [`ExecutionPlan`], without a model.
//!
//! Operation precedence is rename > delete/remove > add/insert > replace.
//! Targets come from ordered templates; the first template that matches
//! wins. Scope precedence is an explicit file mention, then a current-file
//! signal, then an active selection, then the whole project.

use patchwright_config::PlannerConfig;
use patchwright_core::plan::{
    ExecutionPlan, Operation, PlanningContext, SafetyConstraints, Scope, SearchTarget,
};
use regex_lite::Regex;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::LazyLock;
use tracing::debug;

/// Patterns at or above this length never get whole-word matching.
const WHOLE_WORD_MAX_CHARS: usize = 20;

/// `verb X joiner Y` pairs for replace and rename, in priority order.
const REPLACE_FORMS: &[(&str, &str)] = &[
    ("change", "to"),
    ("replace", "with"),
    ("rename", "to"),
    ("update", "to"),
];

const DELETE_VERBS: &[&str] = &["remove", "delete"];
const INSERT_VERBS: &[&str] = &["add", "insert"];

/// Leading words that describe the pattern rather than belong to it.
const PATTERN_FILLERS: &[&str] = &[
    "all occurrences of ",
    "all instances of ",
    "every occurrence of ",
    "every instance of ",
    "occurrences of ",
    "the word ",
    "the text ",
    "the string ",
    "all ",
];

static REPLACE_TEMPLATES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    let mut patterns = Vec::new();
    for (verb, joiner) in REPLACE_FORMS {
        // Quoted form first so quoted text may contain the joiner
        patterns.push(format!(
            r#"(?i)\b{verb}\s+["'`](.+?)["'`]\s+{joiner}\s+["'`](.*?)["'`]"#
        ));
        patterns.push(format!(r"(?i)\b{verb}\s+(.+?)\s+{joiner}\s+(.+)$"));
    }
    compile(&patterns)
});

static DELETE_TEMPLATES: LazyLock<Vec<Regex>> = LazyLock::new(|| single_target(DELETE_VERBS));
static INSERT_TEMPLATES: LazyLock<Vec<Regex>> = LazyLock::new(|| single_target(INSERT_VERBS));

static SCOPE_SUFFIX: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\s+(?:(?:in|within|inside|across|throughout|from)\s+(?:the\s+|this\s+|all\s+|every\s+|whole\s+|entire\s+)?(?:current\s+file|file|files|project|codebase|repo|repository|workspace|selection|\S+\.\w+)|everywhere|globally)\s*$",
    )
    .ok()
});

static CASE_SUFFIX: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)[\s,(]*(?:case[\s-]sensitive(?:ly)?|exact\s+case|match(?:ing)?\s+case)\)?\s*$")
        .ok()
});

static CASE_CUE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:case[\s-]sensitive(?:ly)?|exact\s+case|match(?:ing)?\s+case)\b").ok()
});

static CURRENT_FILE_CUE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:this|current|the\s+current)\s+file\b").ok()
});

fn compile<S: AsRef<str>>(patterns: &[S]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| Regex::new(p.as_ref()).ok())
        .collect()
}

fn single_target(verbs: &[&str]) -> Vec<Regex> {
    let mut patterns = Vec::new();
    for verb in verbs {
        patterns.push(format!(r#"(?i)\b{verb}\s+["'`](.+?)["'`]"#));
        patterns.push(format!(r"(?i)\b{verb}\s+(.+)$"));
    }
    compile(&patterns)
}

fn hits(re: Option<&Regex>, text: &str) -> bool {
    re.is_some_and(|re| re.is_match(text))
}

/// Builds execution plans from instructions. Stateless apart from limits.
#[derive(Debug, Clone, Default)]
pub struct PlanBuilder {
    limits: PlannerConfig,
}

impl PlanBuilder {
    pub fn new(limits: PlannerConfig) -> Self {
        Self { limits }
    }

    pub fn build(&self, instruction: &str, ctx: &PlanningContext) -> ExecutionPlan {
        let text = instruction.trim();
        let operation = detect_operation(text);
        let (pattern, replacement) = extract_targets(operation, text);
        let case_sensitive = hits(CASE_CUE.as_ref(), text);
        let (scope, files) = detect_scope(text, ctx);

        let target = SearchTarget {
            whole_word: !pattern.is_empty()
                && !pattern.contains(char::is_whitespace)
                && pattern.chars().count() < WHOLE_WORD_MAX_CHARS,
            case_sensitive,
            pattern,
        };

        let selection = match scope {
            Scope::SelectedText => ctx.selection.clone(),
            _ => None,
        };

        let description = describe(operation, &target.pattern, replacement.as_deref(), scope);
        debug!(
            operation = %operation,
            scope = %scope,
            pattern = %target.pattern,
            "Built deterministic plan"
        );

        ExecutionPlan {
            constraints: SafetyConstraints {
                max_files: self.limits.max_files,
                max_lines: self.limits.max_lines,
                require_confirmation: operation == Operation::Delete
                    || scope == Scope::EntireProject,
            },
            operation,
            targets: vec![target],
            replacement,
            scope,
            files,
            selection,
            description,
        }
    }
}

fn detect_operation(text: &str) -> Operation {
    let words: HashSet<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect();
    let has = |verbs: &[&str]| verbs.iter().any(|v| words.contains(*v));

    if has(&["rename"]) {
        Operation::Rename
    } else if has(DELETE_VERBS) {
        Operation::Delete
    } else if has(INSERT_VERBS) {
        Operation::Insert
    } else {
        Operation::Replace
    }
}

/// Pattern and optional replacement. An empty pattern means no template matched.
fn extract_targets(operation: Operation, text: &str) -> (String, Option<String>) {
    match operation {
        Operation::Replace | Operation::Rename => {
            for re in REPLACE_TEMPLATES.iter() {
                if let Some(caps) = re.captures(text) {
                    let pattern = caps.get(1).map(|m| capture(text, m, clean_pattern));
                    let replacement = caps.get(2).map(|m| capture(text, m, clean));
                    if let (Some(p), Some(r)) = (pattern, replacement)
                        && !p.is_empty()
                    {
                        return (p, Some(r));
                    }
                }
            }
            (String::new(), None)
        }
        Operation::Delete | Operation::Insert => {
            let templates = if operation == Operation::Delete {
                &*DELETE_TEMPLATES
            } else {
                &*INSERT_TEMPLATES
            };
            templates
                .iter()
                .find_map(|re| re.captures(text))
                .and_then(|caps| caps.get(1).map(|m| capture(text, m, clean_pattern)))
                .map(|p| (p, None))
                .unwrap_or_default()
        }
    }
}

/// Quoted captures are taken verbatim; bare ones are cleaned.
fn capture(text: &str, m: regex_lite::Match<'_>, tidy: fn(&str) -> String) -> String {
    if text[..m.start()].ends_with(['\'', '"', '`']) {
        m.as_str().to_string()
    } else {
        tidy(m.as_str())
    }
}

fn clean_pattern(raw: &str) -> String {
    let mut s = clean(raw);
    loop {
        let lower = s.to_lowercase();
        let Some(filler) = PATTERN_FILLERS
            .iter()
            .find(|f| lower.starts_with(*f) && s.len() > f.len())
        else {
            break;
        };
        s = unquote(s[filler.len()..].trim()).to_string();
    }
    s
}

/// Strip trailing punctuation, scope and case phrases, then surrounding quotes.
fn clean(raw: &str) -> String {
    let mut s = raw.trim().to_string();
    loop {
        let before = s.len();
        s = s
            .trim_end_matches(['.', ',', ';', '!', '?'])
            .trim_end()
            .to_string();
        for re in [&*SCOPE_SUFFIX, &*CASE_SUFFIX].into_iter().flatten() {
            if let Some(m) = re.find(&s) {
                s.truncate(m.start());
            }
        }
        if s.len() == before {
            break;
        }
    }
    unquote(&s).to_string()
}

fn unquote(s: &str) -> &str {
    let bytes = s.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if first == last && matches!(first, b'\'' | b'"' | b'`') {
            return &s[1..s.len() - 1];
        }
    }
    s
}

fn detect_scope(text: &str, ctx: &PlanningContext) -> (Scope, Vec<PathBuf>) {
    let mentioned = mentioned_files(text, &ctx.all_files);
    if !mentioned.is_empty() {
        return (Scope::SpecificFiles, mentioned);
    }

    let current: Vec<PathBuf> = ctx.current_file.iter().cloned().collect();
    if ctx.current_file_only || hits(CURRENT_FILE_CUE.as_ref(), text) {
        return (Scope::CurrentFile, current);
    }

    if ctx.selection.as_deref().is_some_and(|s| !s.trim().is_empty()) {
        return (Scope::SelectedText, current);
    }

    (Scope::EntireProject, Vec::new())
}

/// Project files named in the instruction, by relative path or file name.
fn mentioned_files(text: &str, all_files: &[PathBuf]) -> Vec<PathBuf> {
    let tokens: HashSet<&str> = text
        .split_whitespace()
        .map(|t| {
            t.trim_matches(|c: char| "'\"`,;:!?()[]".contains(c))
                .trim_end_matches('.')
        })
        .filter(|t| !t.is_empty())
        .collect();

    all_files
        .iter()
        .filter(|file| {
            let rel = file.to_string_lossy().replace('\\', "/");
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            tokens.contains(rel.as_str()) || (name.contains('.') && tokens.contains(name.as_str()))
        })
        .cloned()
        .collect()
}

fn describe(operation: Operation, pattern: &str, replacement: Option<&str>, scope: Scope) -> String {
    if pattern.is_empty() {
        return format!("{operation}: no literal target, needs the model");
    }
    match (operation, replacement) {
        (Operation::Replace | Operation::Rename, Some(r)) => {
            format!("{operation} '{pattern}' to '{r}' ({scope})")
        }
        _ => format!("{operation} '{pattern}' ({scope})"),
    }
}
