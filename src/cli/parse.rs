//! CLI parse: clap types for prescient. No behavior; definitions only.

use crate::logging::{LogFormat, LogOutput};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Prescient - speculative pregeneration for branching narratives
#[derive(Parser)]
#[command(name = "prescient")]
#[command(about = "Drive the pregeneration cache and scheduler locally")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Workspace root directory
    #[arg(long, default_value = ".")]
    pub workspace: PathBuf,

    /// Configuration file path (overrides default config loading)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long, default_value = "false")]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<LogFormat>,

    /// Log output (stdout, stderr, file)
    #[arg(long)]
    pub log_output: Option<LogOutput>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Play a scripted session against a synthetic generator
    Simulate {
        /// Options offered by every scene
        #[arg(long, default_value = "4")]
        options: usize,
        /// Synthetic generator latency per call (milliseconds)
        #[arg(long, default_value = "200")]
        latency_ms: u64,
        /// Time the simulated player takes before choosing (milliseconds)
        #[arg(long, default_value = "100")]
        think_ms: u64,
        /// Number of selections to make
        #[arg(long, default_value = "5")]
        rounds: usize,
        /// Always choose this option (default: rotate through options)
        #[arg(long)]
        choose: Option<usize>,
        /// Make every nth generator call fail
        #[arg(long)]
        fail_every: Option<u64>,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Print the effective configuration
    ShowConfig {
        /// Output format (toml or json)
        #[arg(long, default_value = "toml")]
        format: String,
    },
}
