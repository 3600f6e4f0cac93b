use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

/// Shell variables as a filesystem: one directory per process, one file
/// per variable.
#[derive(Parser, Debug)]
#[command(name = "fusevars", version)]
#[command(about = "Per-process typed variables served as a filesystem")]
pub struct Cli {
    /// Settings file (default: <config dir>/fusevars/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// More logging; repeat for trace output
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Mount the store and serve it until Ctrl-C
    Mount {
        mountpoint: PathBuf,

        /// Let other users see the mount (needs user_allow_other)
        #[arg(long)]
        allow_other: bool,

        /// Save every table to this directory on unmount
        #[arg(long, value_name = "DIR")]
        save_dir: Option<PathBuf>,
    },

    /// Print the variables of a saved table
    Dump {
        file: PathBuf,

        /// Field delimiter of the file (default from settings)
        #[arg(short, long)]
        delimiter: Option<char>,

        /// Emit JSON instead of columns
        #[arg(long)]
        json: bool,
    },

    /// Print the effective settings as TOML
    Config,
}

impl Cli {
    /// Filter directive implied by `-v`/`-q`, if any.
    pub fn level_override(&self) -> Option<&'static str> {
        match (self.quiet, self.verbose) {
            (true, _) => Some("warn"),
            (false, 0) => None,
            (false, 1) => Some("debug"),
            (false, _) => Some("trace"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn verbosity_maps_to_levels() {
        let cli = Cli::parse_from(["fusevars", "-vv", "config"]);
        assert_eq!(cli.level_override(), Some("trace"));
        let cli = Cli::parse_from(["fusevars", "dump", "f.vars", "-q", "--delimiter", "|"]);
        assert_eq!(cli.level_override(), Some("warn"));
        match cli.command {
            Command::Dump { delimiter, json, .. } => {
                assert_eq!(delimiter, Some('|'));
                assert!(!json);
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert!(Cli::try_parse_from(["fusevars", "-q", "-v", "config"]).is_err());
    }
}
