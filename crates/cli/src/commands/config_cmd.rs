//! `patchwright config`: print, locate and validate configuration.

use super::{CmdResult, load_config};
use patchwright_config::AppConfig;
use std::path::{Path, PathBuf};

pub fn defaults() {
    print!("{}", AppConfig::default_toml());
}

pub fn show(path: Option<&Path>) -> CmdResult {
    let config = load_config(path)?;
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

pub fn path(path: Option<&Path>) {
    println!("{}", config_path(path).display());
}

pub fn validate(path: Option<&Path>) -> CmdResult {
    let file = config_path(path);
    load_config(path)?;
    if file.exists() {
        println!("✅ {} is valid", file.display());
    } else {
        println!("⚠️  {} not found; defaults are valid", file.display());
    }
    Ok(())
}

fn config_path(path: Option<&Path>) -> PathBuf {
    path.map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"))
}
