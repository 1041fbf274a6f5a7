//! patchwright CLI: the main entry point.
//!
//! Commands:
//! - `plan`    Build a deterministic plan for a literal instruction, optionally apply it
//! - `verify`  Build proposed file contents in a shadow workspace
//! - `run`     Replay a recorded model transcript through a task loop
//! - `config`  Print, locate or validate configuration

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "patchwright",
    about = "patchwright: verified, model-driven code edits",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON log lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Use this config file instead of ~/.patchwright/config.toml
    #[arg(long, global = true, env = "PATCHWRIGHT_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Plan (and optionally apply) a literal edit instruction without a model
    Plan(commands::plan::PlanArgs),

    /// Verify proposed file contents in a shadow workspace
    Verify(commands::verify::VerifyArgs),

    /// Replay a recorded model transcript through the task loop
    Run(commands::run::RunArgs),

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the default configuration (default)
    Defaults,
    /// Print the effective configuration
    Show,
    /// Print the config file path
    Path,
    /// Validate the config file
    Validate,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Plan(args) => {
            let config = commands::load_config(config_path)?;
            commands::plan::run(args, &config).await?
        }
        Commands::Verify(args) => {
            let config = commands::load_config(config_path)?;
            commands::verify::run(args, &config).await?
        }
        Commands::Run(args) => {
            let config = commands::load_config(config_path)?;
            commands::run::run(args, config).await?
        }
        Commands::Config { action } => match action.unwrap_or(ConfigAction::Defaults) {
            ConfigAction::Defaults => commands::config_cmd::defaults(),
            ConfigAction::Show => commands::config_cmd::show(config_path)?,
            ConfigAction::Path => commands::config_cmd::path(config_path),
            ConfigAction::Validate => commands::config_cmd::validate(config_path)?,
        },
    }

    Ok(())
}
