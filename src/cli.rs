//! CLI domain: parse, route and presentation for the developer binary.

mod parse;
mod presentation;
mod route;

pub use parse::{Cli, Commands};
pub use presentation::{format_config, format_simulation_json, format_simulation_text};
pub use route::{run_simulation, RoundReport, RunContext, SimulateArgs, SimulationReport};
