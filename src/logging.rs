//! Logging
//!
//! `tracing` subscriber setup for the binary and for embedders that want the
//! crate's default layout. Events from the cache and scheduler carry
//! `scene_id` and `index` fields; pick the JSON format to keep them machine
//! readable.

use crate::error::PregenError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Filter override, in `EnvFilter` syntax
pub const LOG_ENV: &str = "PRESCIENT_LOG";
pub const LOG_FORMAT_ENV: &str = "PRESCIENT_LOG_FORMAT";
pub const LOG_OUTPUT_ENV: &str = "PRESCIENT_LOG_OUTPUT";

const LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    Stdout,
    #[default]
    Stderr,
    File,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("invalid log format '{}' (expected text or json)", other)),
        }
    }
}

impl FromStr for LogOutput {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stdout" => Ok(LogOutput::Stdout),
            "stderr" => Ok(LogOutput::Stderr),
            "file" => Ok(LogOutput::File),
            other => Err(format!(
                "invalid log output '{}' (expected stdout, stderr or file)",
                other
            )),
        }
    }
}

/// `[logging]` section of the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Base level; one of trace, debug, info, warn, error, off
    pub level: String,
    pub format: LogFormat,
    pub output: LogOutput,
    /// Used when `output = "file"`
    pub file: PathBuf,
    /// ANSI colors for text output on a terminal stream
    pub color: bool,
    /// Per-target levels, e.g. `"prescient::scheduler" = "debug"`
    pub modules: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            output: LogOutput::Stderr,
            file: PathBuf::from(".prescient/prescient.log"),
            color: true,
            modules: HashMap::new(),
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !LEVELS.contains(&self.level.as_str()) {
            return Err(format!("invalid level '{}'", self.level));
        }
        if let Some((module, level)) = self
            .modules
            .iter()
            .find(|(_, level)| !LEVELS.contains(&level.as_str()))
        {
            return Err(format!("invalid level '{}' for {}", level, module));
        }
        Ok(())
    }
}

/// Install the global subscriber.
///
/// `PRESCIENT_LOG` replaces the configured filter entirely;
/// `PRESCIENT_LOG_FORMAT` and `PRESCIENT_LOG_OUTPUT` override the configured
/// format and destination. Unparseable overrides are ignored.
pub fn init_logging(config: Option<&LoggingConfig>) -> Result<(), PregenError> {
    let defaults = LoggingConfig::default();
    let config = config.unwrap_or(&defaults);

    let filter = build_env_filter(config)?;
    let format = env_override(LOG_FORMAT_ENV).unwrap_or(config.format);
    let output = env_override(LOG_OUTPUT_ENV).unwrap_or(config.output);
    let writer = make_writer(output, config)?;
    let ansi = config.color && output != LogOutput::File;

    let registry = Registry::default().with(filter);
    let installed = match format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_writer(writer),
            )
            .try_init(),
        LogFormat::Text => registry
            .with(
                fmt::layer()
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(ansi)
                    .with_writer(writer),
            )
            .try_init(),
    };

    installed.map_err(|e| PregenError::ConfigError(format!("Logging already initialized: {}", e)))
}

fn env_override<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn build_env_filter(config: &LoggingConfig) -> Result<EnvFilter, PregenError> {
    if let Ok(filter) = EnvFilter::try_from_env(LOG_ENV) {
        return Ok(filter);
    }
    if config.level == "off" {
        return Ok(EnvFilter::new("off"));
    }

    config
        .modules
        .iter()
        .try_fold(
            EnvFilter::new(&config.level),
            |filter, (module, level)| -> Result<EnvFilter, PregenError> {
                let directive = format!("{}={}", module, level)
                    .parse::<Directive>()
                    .map_err(|e| invalid_directive(module, e))?;
                Ok(filter.add_directive(directive))
            },
        )
}

fn invalid_directive(module: &str, error: impl Display) -> PregenError {
    PregenError::ConfigError(format!("Invalid log directive for {}: {}", module, error))
}

fn make_writer(output: LogOutput, config: &LoggingConfig) -> Result<BoxMakeWriter, PregenError> {
    Ok(match output {
        LogOutput::Stdout => BoxMakeWriter::new(std::io::stdout),
        LogOutput::Stderr => BoxMakeWriter::new(std::io::stderr),
        LogOutput::File => {
            if let Some(parent) = config.file.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    PregenError::ConfigError(format!("Failed to create log directory: {}", e))
                })?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&config.file)
                .map_err(|e| {
                    PregenError::ConfigError(format!(
                        "Failed to open log file {}: {}",
                        config.file.display(),
                        e
                    ))
                })?;
            BoxMakeWriter::new(std::sync::Arc::new(file))
        }
    })
}
