//! Configuration loading, validation, and management for patchwright.
//!
//! Loads configuration from `~/.patchwright/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use patchwright_core::IntentCategory;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.patchwright/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Diff safety classifier thresholds
    #[serde(default)]
    pub safety: SafetyConfig,

    /// Parser robustness guard settings
    #[serde(default)]
    pub guard: GuardConfig,

    /// Shadow workspace verification
    #[serde(default)]
    pub shadow: ShadowConfig,

    /// Workspace scanner settings
    #[serde(default)]
    pub scanner: ScannerConfig,

    /// Deterministic planner limits
    #[serde(default)]
    pub planner: PlannerConfig,

    /// Autonomy and security settings
    #[serde(default)]
    pub autonomy: AutonomyConfig,

    /// Task loop settings
    #[serde(default)]
    pub agent: AgentConfig,
}

/// Limits for one intent category. `None` means unlimited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryThresholds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_deleted_lines: Option<usize>,

    /// Fraction of original lines, 0.0–1.0
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_deletion_ratio: Option<f64>,

    #[serde(default)]
    pub block_full_rewrite: bool,
}

impl CategoryThresholds {
    pub fn new(lines: Option<usize>, ratio: Option<f64>, block_full_rewrite: bool) -> Self {
        Self {
            max_deleted_lines: lines,
            max_deletion_ratio: ratio,
            block_full_rewrite,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyConfig {
    /// Word-set overlap below which an edit counts as a full rewrite
    #[serde(default = "default_rewrite_similarity")]
    pub rewrite_similarity: f64,

    #[serde(default = "default_text_replacement")]
    pub text_replacement: CategoryThresholds,

    #[serde(default = "default_bounded_edit")]
    pub bounded_edit: CategoryThresholds,

    #[serde(default = "default_full_rewrite")]
    pub full_rewrite: CategoryThresholds,

    #[serde(default = "default_complex")]
    pub complex: CategoryThresholds,
}

fn default_text_replacement() -> CategoryThresholds {
    CategoryThresholds::new(Some(50), Some(0.30), true)
}
fn default_bounded_edit() -> CategoryThresholds {
    CategoryThresholds::new(Some(100), Some(0.50), false)
}
fn default_full_rewrite() -> CategoryThresholds {
    CategoryThresholds::new(None, None, false)
}
fn default_complex() -> CategoryThresholds {
    CategoryThresholds::new(Some(200), Some(0.20), true)
}
fn default_rewrite_similarity() -> f64 {
    0.3
}

impl SafetyConfig {
    pub fn thresholds(&self, category: IntentCategory) -> &CategoryThresholds {
        match category {
            IntentCategory::TextReplacement => &self.text_replacement,
            IntentCategory::BoundedEdit => &self.bounded_edit,
            IntentCategory::FullRewrite => &self.full_rewrite,
            IntentCategory::Complex => &self.complex,
        }
    }
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            rewrite_similarity: default_rewrite_similarity(),
            text_replacement: default_text_replacement(),
            bounded_edit: default_bounded_edit(),
            full_rewrite: default_full_rewrite(),
            complex: default_complex(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardConfig {
    #[serde(default = "default_min_content_chars")]
    pub min_content_chars: usize,

    /// Buffers shorter than this are brace-checked on the final parse
    #[serde(default = "default_truncation_window")]
    pub truncation_window: usize,
}

/// Content shorter than this is never accepted, whatever the config says.
pub const MIN_CONTENT_CHARS_FLOOR: usize = 10;

fn default_min_content_chars() -> usize {
    MIN_CONTENT_CHARS_FLOOR
}
fn default_truncation_window() -> usize {
    500
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            min_content_chars: default_min_content_chars(),
            truncation_window: default_truncation_window(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShadowConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Build timeout in seconds; absent disables the timeout
    #[serde(default = "default_build_timeout", skip_serializing_if = "Option::is_none")]
    pub build_timeout_secs: Option<u64>,

    /// How much of the build log a failure message keeps
    #[serde(default = "default_output_tail_chars")]
    pub output_tail_chars: usize,

    /// Try a copy-on-write clone before the recursive copy
    #[serde(default = "default_true")]
    pub prefer_clone: bool,

    /// Top-level names skipped by the recursive copy
    #[serde(default = "default_copy_excludes")]
    pub copy_excludes: Vec<String>,

    /// Parent directory for shadow copies (system temp dir by default)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scratch_dir: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}
fn default_build_timeout() -> Option<u64> {
    Some(600)
}
fn default_output_tail_chars() -> usize {
    4000
}
fn default_copy_excludes() -> Vec<String> {
    vec![".git".into()]
}

impl ShadowConfig {
    pub fn build_timeout(&self) -> Option<Duration> {
        self.build_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            build_timeout_secs: default_build_timeout(),
            output_tail_chars: default_output_tail_chars(),
            prefer_clone: true,
            copy_excludes: default_copy_excludes(),
            scratch_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Files above this size are never treated as text
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,

    /// Extensions treated as text in addition to the built-in list
    #[serde(default)]
    pub extra_text_extensions: Vec<String>,

    /// Directory names whose contents are never scanned
    #[serde(default = "default_skip_dirs")]
    pub skip_dirs: Vec<String>,
}

fn default_max_file_bytes() -> u64 {
    10 * 1024 * 1024
}
fn default_skip_dirs() -> Vec<String> {
    ["node_modules", "target", "build", "dist", "Pods", "DerivedData", "__pycache__"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: default_max_file_bytes(),
            extra_text_extensions: vec![],
            skip_dirs: default_skip_dirs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannerConfig {
    #[serde(default = "default_max_files")]
    pub max_files: usize,

    #[serde(default = "default_max_lines")]
    pub max_lines: usize,
}

fn default_max_files() -> usize {
    50
}
fn default_max_lines() -> usize {
    1000
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_files: default_max_files(),
            max_lines: default_max_lines(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutonomyLevel {
    /// Terminal commands outside the allowlist need approval (default)
    #[default]
    Supervised,
    /// Everything runs without approval
    Full,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutonomyConfig {
    #[serde(default)]
    pub level: AutonomyLevel,

    /// Terminal commands that never need approval
    #[serde(default = "default_allowed_commands")]
    pub allowed_commands: Vec<String>,

    /// Project-relative prefixes no edit may touch
    #[serde(default = "default_forbidden_paths")]
    pub forbidden_paths: Vec<String>,
}

fn default_allowed_commands() -> Vec<String> {
    ["ls", "cat", "grep", "find", "git", "cargo", "npm", "go", "swift", "pwd", "echo", "wc"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_forbidden_paths() -> Vec<String> {
    vec![".git".into()]
}

impl Default for AutonomyConfig {
    fn default() -> Self {
        Self {
            level: AutonomyLevel::default(),
            allowed_commands: default_allowed_commands(),
            forbidden_paths: default_forbidden_paths(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Tool calls dispatched per turn before the task is failed
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    /// Mark tasks failed when the completion gate rejects them
    #[serde(default = "default_true")]
    pub fail_on_gate_rejection: bool,

    /// Intent assumed for model-written files
    #[serde(default)]
    pub default_intent: IntentCategory,
}

fn default_max_steps() -> usize {
    50
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            fail_on_gate_rejection: true,
            default_intent: IntentCategory::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.patchwright/config.toml).
    ///
    /// Environment overrides:
    /// - `PATCHWRIGHT_SHADOW_TIMEOUT_SECS` (`0` disables the timeout)
    /// - `PATCHWRIGHT_AUTONOMY` (`supervised` or `full`)
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(raw) = std::env::var("PATCHWRIGHT_SHADOW_TIMEOUT_SECS") {
            let secs: u64 = raw.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "PATCHWRIGHT_SHADOW_TIMEOUT_SECS must be a number of seconds, got '{raw}'"
                ))
            })?;
            self.shadow.build_timeout_secs = (secs > 0).then_some(secs);
        }

        if let Ok(level) = std::env::var("PATCHWRIGHT_AUTONOMY") {
            self.autonomy.level = match level.trim() {
                "supervised" => AutonomyLevel::Supervised,
                "full" => AutonomyLevel::Full,
                other => {
                    return Err(ConfigError::ValidationError(format!(
                        "PATCHWRIGHT_AUTONOMY must be 'supervised' or 'full', got '{other}'"
                    )));
                }
            };
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".patchwright")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        for category in [
            IntentCategory::TextReplacement,
            IntentCategory::BoundedEdit,
            IntentCategory::FullRewrite,
            IntentCategory::Complex,
        ] {
            if let Some(ratio) = self.safety.thresholds(category).max_deletion_ratio
                && !(0.0..=1.0).contains(&ratio)
            {
                return Err(ConfigError::ValidationError(format!(
                    "safety.{}: max_deletion_ratio must be between 0.0 and 1.0",
                    category.label().replace(' ', "_")
                )));
            }
        }

        if !(0.0..=1.0).contains(&self.safety.rewrite_similarity) {
            return Err(ConfigError::ValidationError(
                "safety.rewrite_similarity must be between 0.0 and 1.0".into(),
            ));
        }

        if self.guard.min_content_chars < MIN_CONTENT_CHARS_FLOOR {
            return Err(ConfigError::ValidationError(format!(
                "guard.min_content_chars must be >= {MIN_CONTENT_CHARS_FLOOR}"
            )));
        }

        if self.shadow.output_tail_chars == 0 {
            return Err(ConfigError::ValidationError(
                "shadow.output_tail_chars must be > 0".into(),
            ));
        }

        if self.agent.max_steps == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_steps must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Render the default configuration as TOML (for `patchwright config`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
