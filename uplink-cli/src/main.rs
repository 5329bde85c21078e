mod cli;
mod commands;
mod config;
mod epg;
mod logging;
mod run;

use std::process;

use anyhow::Result;
use clap::Parser;
use tracing::{debug, error};

use crate::cli::{Args, Commands};
use crate::config::AppConfig;

fn main() {
    let args = Args::parse();

    if let Err(e) = logging::init_logging(args.verbose, args.quiet, args.log_file.as_deref()) {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }

    if let Err(e) = execute(args) {
        error!("{:#}", e);
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn execute(args: Args) -> Result<()> {
    let config = AppConfig::load(args.config.as_deref())?;
    debug!(?config, "Runtime settings");

    match args.command {
        Commands::Check { session } => commands::check(&session, &config),
        Commands::Calc(calc) => commands::calc(calc),
        Commands::Epg { command } => epg::execute(command),
        Commands::Probe(probe) => commands::probe(probe),
        Commands::Preview { session } => commands::preview(&session, &config),
        Commands::Export {
            session,
            output,
            format,
        } => commands::export(&session, &output, format, &config),
        Commands::Run { session, duration } => run::run(&session, duration, &config),
    }
}
