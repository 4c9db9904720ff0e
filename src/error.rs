//! Error types for the pregeneration cache and scheduler.

use crate::types::{OptionIndex, SceneId};
use std::time::Duration;
use thiserror::Error;

/// Errors raised by an artifact generator.
///
/// All of these are transient from the scheduler's point of view: the option
/// reverts to `Pending` and can be retried by a later promotion.
#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    #[error("Generation failed: {0}")]
    Failed(String),

    #[error("Generator returned invalid output: {0}")]
    InvalidOutput(String),

    #[error("Generation timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Generator panicked: {0}")]
    Panicked(String),
}

/// Errors raised by the cache and scheduler core
#[derive(Debug, Clone, Error)]
pub enum PregenError {
    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("Timed out after {waited:?} waiting for option {index} of scene {scene_id}")]
    Timeout {
        scene_id: SceneId,
        index: OptionIndex,
        waited: Duration,
    },

    #[error("Scene not cached: {0}")]
    StaleReference(SceneId),

    #[error("Option {index} out of range for scene {scene_id} ({len} options)")]
    OptionOutOfRange {
        scene_id: SceneId,
        index: OptionIndex,
        len: usize,
    },

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<config::ConfigError> for PregenError {
    fn from(err: config::ConfigError) -> Self {
        PregenError::ConfigError(err.to_string())
    }
}
