//! CLI presentation: render reports and configuration for the terminal.

use crate::cli::route::SimulationReport;
use crate::config::PrescientConfig;
use crate::error::PregenError;
use comfy_table::presets::UTF8_FULL;
use comfy_table::Table;

/// Rounds table followed by the scheduler counters.
pub fn format_simulation_text(report: &SimulationReport) -> String {
    let mut rounds = Table::new();
    rounds.load_preset(UTF8_FULL);
    rounds.set_header(vec!["Round", "Scene", "Choice", "Outcome", "Wait (ms)", "Lookahead"]);
    for r in &report.rounds {
        rounds.add_row(vec![
            r.round.to_string(),
            r.scene_id.clone(),
            r.choice.clone(),
            r.outcome.clone(),
            r.wait_ms.to_string(),
            r.lookahead.to_string(),
        ]);
    }

    let s = &report.stats;
    let mut stats = Table::new();
    stats.load_preset(UTF8_FULL);
    stats.set_header(vec!["Counter", "Value"]);
    for (name, value) in [
        ("layer1 started", s.layer1_started),
        ("layer1 completed", s.layer1_completed),
        ("layer1 failed", s.layer1_failed),
        ("layer1 skipped", s.layer1_skipped),
        ("layer1 discarded", s.layer1_discarded),
        ("promotions", s.promotions),
        ("layer2 published", s.layer2_published),
        ("layer2 cancelled", s.layer2_cancelled),
        ("fallbacks", s.fallbacks),
    ] {
        stats.add_row(vec![name.to_string(), value.to_string()]);
    }

    format!(
        "Session started {}\n\n{}\n\n{}\n\nCached scenes: {}\nGenerator calls: {}",
        report.started_at, rounds, stats, report.cached_scenes, report.generator_calls
    )
}

pub fn format_simulation_json(report: &SimulationReport) -> Result<String, PregenError> {
    serde_json::to_string_pretty(report)
        .map_err(|e| PregenError::ConfigError(format!("Failed to render report: {}", e)))
}

/// Formats accepted by `simulate --format`
pub const SIMULATION_FORMATS: [&str; 2] = ["text", "json"];

pub fn format_simulation(report: &SimulationReport, format: &str) -> Result<String, PregenError> {
    match format {
        "text" => Ok(format_simulation_text(report)),
        "json" => format_simulation_json(report),
        other => Err(PregenError::ConfigError(format!(
            "Unknown format: {} (must be 'text' or 'json')",
            other
        ))),
    }
}

pub fn format_config(config: &PrescientConfig, format: &str) -> Result<String, PregenError> {
    match format {
        "json" => serde_json::to_string_pretty(config)
            .map_err(|e| PregenError::ConfigError(format!("Failed to render config: {}", e))),
        "toml" => toml::to_string_pretty(config)
            .map_err(|e| PregenError::ConfigError(format!("Failed to render config: {}", e))),
        other => Err(PregenError::ConfigError(format!(
            "Unknown format: {} (must be 'toml' or 'json')",
            other
        ))),
    }
}
