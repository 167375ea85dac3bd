//! Reflux - a reactive script runner with live viewers.

mod cache;
mod cli;
mod config;
mod core;
mod logger;
mod message;
mod runner;
mod server;
mod session;
mod source;
mod storage;
mod uploads;
mod widgets;

use anyhow::Result;
use clap::{ColorChoice, Parser};
use cli::{Cli, Commands};
use config::Config;
use std::sync::Arc;

fn main() -> Result<()> {
    // Setup global Ctrl+C handler (before any blocking operations)
    core::setup_shutdown_handler()?;

    let cli = Cli::parse();

    // Set global color override based on CLI option
    match cli.color {
        ColorChoice::Always => owo_colors::set_override(true),
        ColorChoice::Never => owo_colors::set_override(false),
        ColorChoice::Auto => {} // owo-colors auto-detects TTY
    }
    logger::set_verbose(cli.verbose);

    let config = Arc::new(Config::load(&cli)?);

    match &cli.command {
        Commands::Serve { .. } => server::serve(config),
        Commands::Run { widgets, .. } => cli::run::run_script(config, widgets.as_deref()),
        Commands::Check { .. } => cli::check::check(&config),
    }
}
