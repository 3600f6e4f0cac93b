//! Binary entry: argument parsing, settings, logging and dispatch.

pub mod cli;
pub mod commands;
pub mod logging;

use anyhow::Result;
use clap::Parser;

use crate::settings::load_settings;
use cli::{Cli, Command};

pub fn run() -> Result<()> {
    run_with(Cli::parse())
}

pub fn run_with(cli: Cli) -> Result<()> {
    let (settings, origin) = load_settings(cli.config.as_deref())?;
    let _log_guard = logging::init(&settings.logging, cli.level_override())?;
    match &origin {
        Some(path) => tracing::debug!(config = %path.display(), "settings loaded"),
        None => tracing::debug!("no config file, using defaults"),
    }

    match cli.command {
        Command::Mount {
            mountpoint,
            allow_other,
            save_dir,
        } => commands::mount(&settings, &mountpoint, allow_other, save_dir.as_deref()),
        Command::Dump { file, delimiter, json } => {
            commands::dump(&settings, &file, delimiter, json, &mut std::io::stdout().lock())
        }
        Command::Config => {
            commands::print_config(&settings, origin.as_deref(), &mut std::io::stdout().lock())
        }
    }
}
