//! Prescient: Speculative Pregeneration for Branching Narratives
//!
//! A two-tier cache and scheduler that hides slow content generation behind
//! speculation: every visible option of a scene is generated before the player
//! chooses, and the options one step further are precomputed in the background.

pub mod cache;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod generator;
pub mod logging;
pub mod scheduler;
pub mod types;

pub use coordinator::{FallbackReason, RequestCoordinator, Selection, SelectionOutcome};
pub use error::{GenerationError, PregenError};
pub use generator::ArtifactGenerator;
pub use types::{Artifact, GameState, OptionIndex, SceneId};
