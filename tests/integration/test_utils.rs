//! Shared test utilities for integration tests
//!
//! A scripted generator whose behavior is keyed by choice label, plus helpers
//! to build coordinators and scenes. Layer1 labels are `opt {i}`; layer2 labels
//! are `opt {i} / sub {j}`.

use async_trait::async_trait;
use prescient::config::PrescientConfig;
use prescient::{
    Artifact, ArtifactGenerator, GameState, GenerationError, OptionIndex, RequestCoordinator,
    SceneId,
};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::sleep;

/// Fake generator with per-label delays, failures, panics and gates.
pub struct ScriptedGenerator {
    branching: usize,
    default_delay: Duration,
    delays: HashMap<String, Duration>,
    failing: HashSet<String>,
    panicking: HashSet<String>,
    gates: HashMap<String, Arc<Notify>>,
    calls: Mutex<Vec<String>>,
    states: Mutex<HashMap<String, GameState>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn new(branching: usize) -> Self {
        Self {
            branching,
            default_delay: Duration::from_millis(50),
            delays: HashMap::new(),
            failing: HashSet::new(),
            panicking: HashSet::new(),
            gates: HashMap::new(),
            calls: Mutex::new(Vec::new()),
            states: Mutex::new(HashMap::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    pub fn with_delay(mut self, label: &str, delay: Duration) -> Self {
        self.delays.insert(label.to_string(), delay);
        self
    }

    /// Every call for `label` fails
    pub fn failing(mut self, label: &str) -> Self {
        self.failing.insert(label.to_string());
        self
    }

    /// Every call for `label` panics
    pub fn panicking(mut self, label: &str) -> Self {
        self.panicking.insert(label.to_string());
        self
    }

    /// Calls for `label` block until [`ScriptedGenerator::release`]
    pub fn gated(mut self, label: &str) -> Self {
        self.gates.insert(label.to_string(), Arc::new(Notify::new()));
        self
    }

    pub fn release(&self, label: &str) {
        if let Some(gate) = self.gates.get(label) {
            gate.notify_one();
        }
    }

    /// Labels in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, label: &str) -> usize {
        self.calls().iter().filter(|c| *c == label).count()
    }

    /// Calls whose label starts with `prefix`
    pub fn calls_with_prefix(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    /// Layer1 calls only
    pub fn layer1_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| !c.contains(" / "))
            .collect()
    }

    /// State the generator last received for `label`
    pub fn state_for(&self, label: &str) -> Option<GameState> {
        self.states.lock().unwrap().get(label).cloned()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactGenerator for ScriptedGenerator {
    async fn generate(
        &self,
        _index: OptionIndex,
        choice_label: &str,
        state: &GameState,
    ) -> Result<Artifact, GenerationError> {
        self.calls.lock().unwrap().push(choice_label.to_string());
        self.states
            .lock()
            .unwrap()
            .insert(choice_label.to_string(), state.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(gate) = self.gates.get(choice_label) {
            gate.notified().await;
        }
        let delay = self
            .delays
            .get(choice_label)
            .copied()
            .unwrap_or(self.default_delay);
        sleep(delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.panicking.contains(choice_label) {
            panic!("scripted panic for {}", choice_label);
        }
        if self.failing.contains(choice_label) {
            return Err(GenerationError::Failed(format!(
                "scripted failure for {}",
                choice_label
            )));
        }

        let next_options = (0..self.branching)
            .map(|j| format!("{} / sub {}", choice_label, j))
            .collect();
        Ok(Artifact::new(format!("Scene after {}", choice_label), next_options)
            .with_delta("last", json!(choice_label)))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Config with layer2 off and short bounds
pub fn layer1_only_config() -> PrescientConfig {
    let mut config = PrescientConfig::default();
    config.scheduler.layer2_enabled = false;
    config.scheduler.select_timeout_ms = 10_000;
    config
}

pub fn with_layer2(mut config: PrescientConfig) -> PrescientConfig {
    config.scheduler.layer2_enabled = true;
    config
}

pub fn coordinator(
    generator: &Arc<ScriptedGenerator>,
    config: &PrescientConfig,
) -> RequestCoordinator {
    RequestCoordinator::new(generator.clone(), config)
}

/// `opt 0 .. opt n-1`
pub fn options(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("opt {}", i)).collect()
}

pub fn initial_state() -> GameState {
    GameState::new(json!({ "hero": "Ada", "world": {} }))
}

pub fn scene(id: &str) -> SceneId {
    SceneId::from(id)
}

/// Start a scene with `n` options under an explicit id
pub async fn start(coordinator: &RequestCoordinator, id: &str, n: usize) -> SceneId {
    coordinator
        .start_pregeneration(Some(scene(id)), options(n), initial_state())
        .await
}

pub async fn settle(coordinator: &RequestCoordinator, id: &SceneId) {
    assert!(
        coordinator
            .scheduler()
            .wait_for_idle(id, Duration::from_secs(60))
            .await,
        "scene {} did not settle",
        id
    );
}
