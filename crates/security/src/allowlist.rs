//! Command allowlist: decides which terminal commands run unattended.

use patchwright_config::{AutonomyConfig, AutonomyLevel};

/// Result of checking a terminal command against the policy.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandCheck {
    /// Runs without asking
    Allowed,
    /// Needs explicit human approval first
    NeedsApproval { reason: String },
}

/// Terminal command policy derived from the autonomy settings.
#[derive(Debug, Clone)]
pub struct CommandPolicy {
    level: AutonomyLevel,
    allowed_commands: Vec<String>,
}

impl CommandPolicy {
    pub fn new(level: AutonomyLevel, allowed_commands: Vec<String>) -> Self {
        Self {
            level,
            allowed_commands,
        }
    }

    pub fn from_config(config: &AutonomyConfig) -> Self {
        Self::new(config.level, config.allowed_commands.clone())
    }

    /// Check a shell command line.
    ///
    /// Rules:
    /// - `full` autonomy → everything allowed
    /// - every segment of a pipeline or `&&`/`||`/`;` chain must start with
    ///   an allowlisted program
    /// - `"*"` in the allowlist allows everything
    pub fn check(&self, command: &str) -> CommandCheck {
        if self.level == AutonomyLevel::Full {
            return CommandCheck::Allowed;
        }
        if self.allowed_commands.iter().any(|c| c == "*") {
            return CommandCheck::Allowed;
        }

        for segment in split_segments(command) {
            let program = base_program(segment);
            if program.is_empty() {
                continue;
            }
            if !self.allowed_commands.iter().any(|a| a == program) {
                return CommandCheck::NeedsApproval {
                    reason: format!("'{program}' is not in the command allowlist"),
                };
            }
        }
        CommandCheck::Allowed
    }
}

fn split_segments(command: &str) -> impl Iterator<Item = &str> {
    command
        .split(['|', ';', '&'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// First word of a segment, skipping `VAR=value` prefixes and path components.
fn base_program(segment: &str) -> &str {
    let word = segment
        .split_whitespace()
        .find(|w| !w.contains('='))
        .unwrap_or("");
    word.rsplit('/').next().unwrap_or(word)
}
