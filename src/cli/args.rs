//! Command-line interface definitions.

use clap::{ColorChoice, Parser, Subcommand};
use std::path::PathBuf;

/// Reflux reactive script runner CLI
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None, arg_required_else_help = true)]
pub struct Cli {
    /// Control colored output (auto, always, never)
    #[arg(long, global = true, default_value = "auto")]
    pub color: ColorChoice,

    /// Config file path (default: reflux.toml)
    #[arg(short = 'C', long, global = true, default_value = "reflux.toml", value_hint = clap::ValueHint::FilePath)]
    pub config: PathBuf,

    /// Enable verbose output for debugging
    #[arg(long, global = true)]
    pub verbose: bool,

    /// subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Serve a script to live viewers, rerunning it on every input change
    #[command(visible_alias = "s")]
    Serve {
        /// Lua script to run
        #[arg(value_hint = clap::ValueHint::FilePath)]
        script: PathBuf,

        #[command(flatten)]
        args: ServeArgs,
    },

    /// Run a script once without a viewer and print its output as JSON lines
    #[command(visible_alias = "r")]
    Run {
        /// Lua script to run
        #[arg(value_hint = clap::ValueHint::FilePath)]
        script: PathBuf,

        /// Initial widget state as a JSON object (e.g. '{"slider:size": 3}')
        #[arg(short, long)]
        widgets: Option<String>,
    },

    /// Compile a script without running it
    #[command(visible_alias = "c")]
    Check {
        /// Lua script to check
        #[arg(value_hint = clap::ValueHint::FilePath)]
        script: PathBuf,
    },
}

/// Serve command arguments.
#[derive(clap::Args, Debug, Clone)]
pub struct ServeArgs {
    /// Network interface to bind (e.g., 127.0.0.1, 0.0.0.0)
    #[arg(short, long)]
    pub interface: Option<std::net::IpAddr>,

    /// Port number to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Rerun the script whenever it changes on disk
    #[arg(short, long, action = clap::ArgAction::Set, num_args = 0..=1, default_missing_value = "true", require_equals = false)]
    pub run_on_save: Option<bool>,

    /// Save every run to the storage directory while it is running
    #[arg(short, long, action = clap::ArgAction::Set, num_args = 0..=1, default_missing_value = "true", require_equals = false)]
    pub live_save: Option<bool>,
}

impl Cli {
    pub const fn is_serve(&self) -> bool {
        matches!(self.command, Commands::Serve { .. })
    }

    /// Script path named by the subcommand.
    pub fn script(&self) -> &PathBuf {
        match &self.command {
            Commands::Serve { script, .. }
            | Commands::Run { script, .. }
            | Commands::Check { script } => script,
        }
    }
}
