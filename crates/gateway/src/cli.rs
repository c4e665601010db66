//! Command-line interface and config loading.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use cf_domain::config::Config;

#[derive(Debug, Parser)]
#[command(name = "clipforge", about = "Agentic orchestration core for video creation")]
pub struct Cli {
    /// Path to the TOML config file. Defaults to ./clipforge.toml, then
    /// the user config directory.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the server (default when no subcommand is given).
    Serve,
    /// Config inspection helpers.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print the version.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Validate the config file and report issues.
    Validate,
    /// Print the effective config as TOML.
    Show,
}

/// Load config from the given path, or the first existing default
/// location. A missing file yields the built-in defaults.
pub fn load_config(explicit: Option<&PathBuf>) -> anyhow::Result<(Config, Option<PathBuf>)> {
    let candidate = explicit.cloned().or_else(|| {
        let local = PathBuf::from("clipforge.toml");
        if local.exists() {
            return Some(local);
        }
        dirs::config_dir()
            .map(|d| d.join("clipforge").join("config.toml"))
            .filter(|p| p.exists())
    });

    match candidate {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading config at {}", path.display()))?;
            let config: Config = toml::from_str(&raw)
                .with_context(|| format!("parsing config at {}", path.display()))?;
            Ok((config, Some(path)))
        }
        None => Ok((Config::default(), None)),
    }
}
