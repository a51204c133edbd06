use crate::config::cli::CliOpt;
use crate::config::{ParameterSet, ScenarioConfig};
use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod config;
mod congestion;
mod loss;
mod queueing;
mod simulation;
mod topology;
mod traffic;
mod util;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let options = CliOpt::parse();
    let params = match ParameterSet::load(&options) {
        Ok(params) => params,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    // Nothing is built before every parameter checks out
    let config = match ScenarioConfig::validate(&params) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = simulation::run(&config) {
        eprintln!("Error: {e:?}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
