//! Configuration System
//!
//! Process-wide parameters for the cache and scheduler: capacity, the protected
//! bootstrap scene, wait and join bounds, worker caps. Loaded hierarchically
//! (defaults, global file, workspace files, environment) and validated.

use crate::error::PregenError;
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

mod facade;
mod merge;
mod sources;

pub use facade::ConfigLoader;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrescientConfig {
    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Scene cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of cached scenes
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Scene that is never evicted nor removed on transition
    #[serde(default = "default_bootstrap_scene")]
    pub bootstrap_scene: String,

    /// Join bound for layer2 tasks of evicted scenes (milliseconds)
    #[serde(default = "default_evict_join_timeout_ms")]
    pub evict_join_timeout_ms: u64,

    /// Join bound for layer2 tasks of scenes left behind (milliseconds)
    #[serde(default = "default_remove_join_timeout_ms")]
    pub remove_join_timeout_ms: u64,
}

pub(crate) fn default_capacity() -> usize {
    3
}

pub(crate) fn default_bootstrap_scene() -> String {
    "initial".to_string()
}

pub(crate) fn default_evict_join_timeout_ms() -> u64 {
    500
}

pub(crate) fn default_remove_join_timeout_ms() -> u64 {
    1000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            bootstrap_scene: default_bootstrap_scene(),
            evict_join_timeout_ms: default_evict_join_timeout_ms(),
            remove_join_timeout_ms: default_remove_join_timeout_ms(),
        }
    }
}

/// Generation scheduler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How long a selection waits for its artifact (milliseconds)
    #[serde(default = "default_select_timeout_ms")]
    pub select_timeout_ms: u64,

    /// Join bound when a selection cancels a layer2 pass (milliseconds)
    #[serde(default = "default_layer2_join_timeout_ms")]
    pub layer2_join_timeout_ms: u64,

    /// Generation attempts a single selection may make for its option
    #[serde(default = "default_max_select_attempts")]
    pub max_select_attempts: u32,

    /// Cap on concurrent layer1 workers per scene (default: one per option)
    #[serde(default)]
    pub layer1_workers: Option<usize>,

    /// Per-call generator timeout (milliseconds)
    #[serde(default)]
    pub generation_timeout_ms: Option<u64>,

    /// Run the second-tier lookahead after layer1
    #[serde(default = "default_true")]
    pub layer2_enabled: bool,
}

pub(crate) fn default_select_timeout_ms() -> u64 {
    6 * 60 * 1000
}

pub(crate) fn default_layer2_join_timeout_ms() -> u64 {
    2000
}

pub(crate) fn default_max_select_attempts() -> u32 {
    2
}

fn default_true() -> bool {
    true
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            select_timeout_ms: default_select_timeout_ms(),
            layer2_join_timeout_ms: default_layer2_join_timeout_ms(),
            max_select_attempts: default_max_select_attempts(),
            layer1_workers: None,
            generation_timeout_ms: None,
            layer2_enabled: true,
        }
    }
}

impl SchedulerConfig {
    pub fn select_timeout(&self) -> Duration {
        Duration::from_millis(self.select_timeout_ms)
    }

    pub fn layer2_join_timeout(&self) -> Duration {
        Duration::from_millis(self.layer2_join_timeout_ms)
    }

    pub fn generation_timeout(&self) -> Option<Duration> {
        self.generation_timeout_ms.map(Duration::from_millis)
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    Cache(String),
    Scheduler(String),
    Logging(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Cache(msg) => write!(f, "cache: {}", msg),
            ValidationError::Scheduler(msg) => write!(f, "scheduler: {}", msg),
            ValidationError::Logging(msg) => write!(f, "logging: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.capacity == 0 {
            return Err("capacity must be at least 1".to_string());
        }
        if self.bootstrap_scene.trim().is_empty() {
            return Err("bootstrap_scene cannot be empty".to_string());
        }
        Ok(())
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.select_timeout_ms == 0 {
            return Err("select_timeout_ms must be positive".to_string());
        }
        if self.max_select_attempts == 0 {
            return Err("max_select_attempts must be at least 1".to_string());
        }
        if self.layer1_workers == Some(0) {
            return Err("layer1_workers must be at least 1 when set".to_string());
        }
        if self.generation_timeout_ms == Some(0) {
            return Err("generation_timeout_ms must be positive when set".to_string());
        }
        Ok(())
    }
}

impl PrescientConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Err(e) = self.cache.validate() {
            errors.push(ValidationError::Cache(e));
        }
        if let Err(e) = self.scheduler.validate() {
            errors.push(ValidationError::Scheduler(e));
        }
        if let Err(e) = self.logging.validate() {
            errors.push(ValidationError::Logging(e));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validate, folding all problems into one error.
    pub fn validated(self) -> Result<Self, PregenError> {
        self.validate().map_err(|errors| {
            let msgs: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            PregenError::ConfigError(format!(
                "Configuration validation failed:\n{}",
                msgs.join("\n")
            ))
        })?;
        Ok(self)
    }
}
