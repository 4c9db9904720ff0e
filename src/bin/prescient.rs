//! Prescient CLI Binary
//!
//! Local harness for the pregeneration cache and scheduler.

use anyhow::Context;
use clap::Parser;
use prescient::cli::{Cli, RunContext};
use prescient::config::ConfigLoader;
use prescient::logging::{init_logging, LoggingConfig};
use std::process;
use tracing::{error, info};

fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging(Some(&build_logging_config(&cli))) {
        eprintln!("prescient: cannot set up logging: {}", e);
        process::exit(1);
    }
    info!(version = env!("CARGO_PKG_VERSION"), "prescient starting");

    let output = run(&cli).unwrap_or_else(|e| {
        error!(error = %format!("{:#}", e), "prescient command failed");
        eprintln!("prescient: {:#}", e);
        process::exit(1);
    });
    println!("{}", output);
}

fn run(cli: &Cli) -> anyhow::Result<String> {
    let context = RunContext::new(cli.workspace.clone(), cli.config.clone())
        .context("Error loading configuration")?;
    context
        .execute(&cli.command)
        .context("Error executing command")
}

/// Logging section of the effective config, then CLI flags on top.
/// A config that fails to load falls back to default logging; the command
/// itself reports the load error.
fn build_logging_config(cli: &Cli) -> LoggingConfig {
    let loaded = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(&cli.workspace),
    };
    let mut config = loaded.map(|c| c.logging).unwrap_or_default();

    if cli.verbose {
        config.level = "debug".to_string();
    }
    if let Some(level) = &cli.log_level {
        config.level = level.clone();
    }
    if let Some(format) = cli.log_format {
        config.format = format;
    }
    if let Some(output) = cli.log_output {
        config.output = output;
    }

    config
}
