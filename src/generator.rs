//! Artifact Generator Boundary
//!
//! The slow, occasionally failing collaborator that turns a choice into the next
//! scene. The core owns and invokes it but never implements real generation;
//! request construction, the network call and its retry policy live outside.

use crate::error::GenerationError;
use crate::types::{Artifact, GameState, OptionIndex};
use async_trait::async_trait;
use futures::FutureExt;
use serde_json::json;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, warn};

/// Produces the artifact for one option.
///
/// Must be safe to call concurrently for different keys. Calls may take from
/// seconds to minutes.
#[async_trait]
pub trait ArtifactGenerator: Send + Sync {
    async fn generate(
        &self,
        index: OptionIndex,
        choice_label: &str,
        state: &GameState,
    ) -> Result<Artifact, GenerationError>;

    /// Name used in log events
    fn name(&self) -> &str {
        "generator"
    }
}

/// Invoke the generator with the core's safety net applied.
///
/// Panics become `GenerationError::Panicked`, an optional per-call timeout
/// becomes `GenerationError::TimedOut`, and unusable artifacts become
/// `GenerationError::InvalidOutput`. This is the only place generators are called.
pub(crate) async fn invoke(
    generator: &dyn ArtifactGenerator,
    index: OptionIndex,
    choice_label: &str,
    state: &GameState,
    call_timeout: Option<Duration>,
) -> Result<Artifact, GenerationError> {
    let start = Instant::now();
    let call = AssertUnwindSafe(generator.generate(index, choice_label, state)).catch_unwind();

    let outcome = match call_timeout {
        Some(limit) => match tokio::time::timeout(limit, call).await {
            Ok(outcome) => outcome,
            Err(_) => return Err(GenerationError::TimedOut(limit)),
        },
        None => call.await,
    };

    let result = match outcome {
        Ok(result) => result,
        Err(payload) => Err(GenerationError::Panicked(panic_message(payload.as_ref()))),
    };

    let result = result.and_then(|artifact| {
        artifact
            .validate()
            .map(|_| artifact)
            .map_err(GenerationError::InvalidOutput)
    });

    match &result {
        Ok(_) => debug!(
            generator = generator.name(),
            index,
            duration_ms = start.elapsed().as_millis(),
            "Generator call returned"
        ),
        Err(e) => warn!(
            generator = generator.name(),
            index,
            duration_ms = start.elapsed().as_millis(),
            error = %e,
            "Generator call failed"
        ),
    }
    result
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Latency-injected stand-in generator used by the simulation binary.
///
/// Output is a pure function of the inputs, so repeated runs are comparable.
pub struct SyntheticGenerator {
    latency: Duration,
    branching: usize,
    fail_every: Option<u64>,
    calls: AtomicU64,
}

impl SyntheticGenerator {
    pub fn new(latency: Duration, branching: usize) -> Self {
        Self {
            latency,
            branching,
            fail_every: None,
            calls: AtomicU64::new(0),
        }
    }

    /// Fail every `n`th call (1-based)
    pub fn failing_every(mut self, n: u64) -> Self {
        self.fail_every = (n > 0).then_some(n);
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ArtifactGenerator for SyntheticGenerator {
    async fn generate(
        &self,
        index: OptionIndex,
        choice_label: &str,
        state: &GameState,
    ) -> Result<Artifact, GenerationError> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        sleep(self.latency).await;

        if let Some(n) = self.fail_every {
            if call % n == 0 {
                return Err(GenerationError::Failed(format!(
                    "synthetic failure on call {}",
                    call
                )));
            }
        }

        let depth = state
            .as_value()
            .get(crate::types::WORLD_KEY)
            .and_then(|w| w.get("depth"))
            .and_then(|d| d.as_u64())
            .unwrap_or(0);

        let next_options = (1..=self.branching)
            .map(|n| format!("{} / path {}", choice_label, n))
            .collect();

        Ok(
            Artifact::new(format!("You {} (option {}).", choice_label, index + 1), next_options)
                .with_delta("depth", json!(depth + 1))
                .with_delta("last_choice", json!(choice_label)),
        )
    }

    fn name(&self) -> &str {
        "synthetic"
    }
}
