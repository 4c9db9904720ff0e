//! CLI route: run context and command dispatch.

use crate::cli::parse::Commands;
use crate::cli::presentation::{format_config, format_simulation, SIMULATION_FORMATS};
use crate::config::{ConfigLoader, PrescientConfig};
use crate::coordinator::RequestCoordinator;
use crate::error::PregenError;
use crate::generator::SyntheticGenerator;
use crate::scheduler::SchedulerStats;
use crate::types::{GameState, SceneId};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::info;

/// Runtime context for CLI execution: workspace and effective configuration.
#[derive(Debug)]
pub struct RunContext {
    config: PrescientConfig,
    workspace_root: PathBuf,
}

/// Parameters of one simulated session
#[derive(Debug, Clone)]
pub struct SimulateArgs {
    pub options: usize,
    pub latency: Duration,
    pub think: Duration,
    pub rounds: usize,
    pub choose: Option<usize>,
    pub fail_every: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoundReport {
    pub round: usize,
    pub scene_id: String,
    pub choice: String,
    pub outcome: String,
    pub wait_ms: u128,
    /// Sub-options of the choice already generated when the selection returned
    pub lookahead: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    /// RFC 3339 start time of the session
    pub started_at: String,
    pub rounds: Vec<RoundReport>,
    pub stats: SchedulerStats,
    pub cached_scenes: usize,
    pub generator_calls: u64,
}

impl RunContext {
    /// Create run context from workspace root and optional config path.
    pub fn new(workspace_root: PathBuf, config_path: Option<PathBuf>) -> Result<Self, PregenError> {
        let config = match config_path {
            Some(ref path) => ConfigLoader::load_from_file(path)?,
            None => ConfigLoader::load(&workspace_root)?,
        };
        Ok(Self {
            config: config.validated()?,
            workspace_root,
        })
    }

    pub fn config(&self) -> &PrescientConfig {
        &self.config
    }

    /// Execute a command and return its rendered output.
    pub fn execute(&self, command: &Commands) -> Result<String, PregenError> {
        match command {
            Commands::Simulate {
                options,
                latency_ms,
                think_ms,
                rounds,
                choose,
                fail_every,
                format,
            } => {
                if !SIMULATION_FORMATS.contains(&format.as_str()) {
                    return Err(PregenError::ConfigError(format!(
                        "Unknown format: {} (must be 'text' or 'json')",
                        format
                    )));
                }
                let args = SimulateArgs {
                    options: *options,
                    latency: Duration::from_millis(*latency_ms),
                    think: Duration::from_millis(*think_ms),
                    rounds: *rounds,
                    choose: *choose,
                    fail_every: *fail_every,
                };
                let runtime = tokio::runtime::Builder::new_multi_thread()
                    .enable_all()
                    .build()
                    .map_err(|e| PregenError::ConfigError(format!("Failed to start runtime: {}", e)))?;
                let report = runtime.block_on(run_simulation(&self.config, &args));
                format_simulation(&report, format)
            }
            Commands::ShowConfig { format } => {
                info!(workspace = %self.workspace_root.display(), "Rendering configuration");
                format_config(&self.config, format)
            }
        }
    }
}

/// Play `args.rounds` selections, starting from the bootstrap scene and
/// moving to the scene produced by each chosen artifact.
pub async fn run_simulation(config: &PrescientConfig, args: &SimulateArgs) -> SimulationReport {
    let started_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    let mut generator = SyntheticGenerator::new(args.latency, args.options);
    if let Some(n) = args.fail_every {
        generator = generator.failing_every(n);
    }
    let generator = Arc::new(generator);
    let coordinator = RequestCoordinator::new(generator.clone(), config);

    let mut state = GameState::new(json!({ "world": {} }));
    let mut options: Vec<String> = (1..=args.options)
        .map(|i| format!("Take path {}", i))
        .collect();
    let bootstrap = coordinator.cache().bootstrap().clone();
    let mut scene_id = coordinator
        .start_pregeneration(Some(bootstrap), options.clone(), state.clone())
        .await;
    let mut previous: Option<SceneId> = None;
    let mut rounds = Vec::with_capacity(args.rounds);

    for round in 0..args.rounds {
        if options.is_empty() {
            break;
        }
        sleep(args.think).await;

        let index = args.choose.unwrap_or(round) % options.len();
        let start = Instant::now();
        let selection = coordinator
            .select_option(&scene_id, index, previous.as_ref())
            .await;
        let wait_ms = start.elapsed().as_millis();
        let lookahead = (0..selection.artifact.next_options.len())
            .filter(|sub| coordinator.fetch_layer2(&scene_id, index, *sub).is_some())
            .count();

        rounds.push(RoundReport {
            round: round + 1,
            scene_id: scene_id.to_string(),
            choice: options[index].clone(),
            outcome: format!("{:?}", selection.outcome),
            wait_ms,
            lookahead,
        });

        state = state.advanced_by(&selection.artifact);
        options = selection.artifact.next_options.clone();
        previous = Some(scene_id.clone());
        scene_id = coordinator
            .start_pregeneration(None, options.clone(), state.clone())
            .await;
    }

    SimulationReport {
        started_at,
        rounds,
        stats: coordinator.stats(),
        cached_scenes: coordinator.cache().len(),
        generator_calls: generator.calls(),
    }
}
