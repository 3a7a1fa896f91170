mod archive;
mod cli;
mod commands;
mod config;
mod db;
mod engine;
mod error;
mod identity;
mod model;
mod notify;
mod util;

use anyhow::Result;
use clap::Parser;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::error::CalibrationError;

fn main() {
    init_tracing();

    if let Err(err) = run() {
        error!(error = %err, "command failed");
        for cause in err.chain().skip(1) {
            error!(cause = %cause, "caused by");
        }
        if err
            .downcast_ref::<CalibrationError>()
            .is_some_and(CalibrationError::is_operator_actionable)
        {
            warn!("adjust the session configuration or archive contents and retry");
        }
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Archive(command) => commands::archive::run(&cli.global, command),
        Commands::Session(command) => commands::session::run(&cli.global, command),
        Commands::Randomize(args) => commands::randomize::run(&cli.global, args),
        Commands::Anchor(command) => commands::anchor::run(&cli.global, command),
        Commands::Score(command) => commands::score::run(&cli.global, command),
        Commands::Results(command) => commands::results::run(&cli.global, command),
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
