//! klipper-forge command line.

use anyhow::Result;
use clap::Parser;
use klipper_forge::cli::{self, Cli, Outcome};
use klipper_forge::config::ConfigLoader;
use klipper_forge::logging::{self, LogTarget};
use std::process::ExitCode;
use tracing::debug;

fn main() -> ExitCode {
    match run() {
        Ok(Outcome::Clean) => ExitCode::SUCCESS,
        Ok(Outcome::Blocked) => ExitCode::from(1),
        Err(error) => {
            eprintln!("error: {:#}", error);
            ExitCode::from(2)
        }
    }
}

fn run() -> Result<Outcome> {
    let cli = Cli::parse();
    logging::init(&LogTarget::parse(&cli.log), cli.verbose)?;

    let loader = ConfigLoader::load_with_explicit(cli.config.as_deref())?;
    for (tier, path) in loader.sources() {
        debug!(%tier, path = %path.display(), "Config source");
    }
    let config = loader.into_config();

    cli::run(cli.command, &config)
}
