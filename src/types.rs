//! Core value types: scene ids, option indices, artifacts and game state.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Index of a selectable option within a scene
pub type OptionIndex = usize;

/// Key under which layer1 state deltas are merged into the game state.
pub const WORLD_KEY: &str = "world";

const FALLBACK_OPTIONS: [&str; 4] = [
    "Keep going",
    "Check your current status",
    "Go back",
    "Explore the surroundings",
];

/// Identifier of a scene (a narrative decision point)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SceneId(String);

impl SceneId {
    pub fn new(id: impl Into<String>) -> Self {
        SceneId(id.into())
    }

    /// Derive a stable id from the game state and the options visible in it.
    ///
    /// The same state and options always produce the same id, so a client that
    /// lost its id can recompute it.
    pub fn derive(state: &GameState, options: &[String]) -> Self {
        let mut hasher = blake3::Hasher::new();
        // serde_json maps are ordered, so this rendering is canonical
        hasher.update(state.as_value().to_string().as_bytes());
        hasher.update(&[0u8]);
        for option in options {
            hasher.update(option.as_bytes());
            hasher.update(&[0u8]);
        }
        let digest = hasher.finalize();
        SceneId(hex::encode(&digest.as_bytes()[..12]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SceneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SceneId {
    fn from(id: &str) -> Self {
        SceneId(id.to_string())
    }
}

impl From<String> for SceneId {
    fn from(id: String) -> Self {
        SceneId(id)
    }
}

/// Generated content for one option: the next scene text, the options it
/// offers, and the change it makes to the game state.
///
/// Artifacts are immutable once published and are shared as `Arc<Artifact>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub scene: String,
    #[serde(default)]
    pub next_options: Vec<String>,
    #[serde(default)]
    pub state_delta: Map<String, Value>,
}

impl Artifact {
    pub fn new(scene: impl Into<String>, next_options: Vec<String>) -> Self {
        Self {
            scene: scene.into(),
            next_options,
            state_delta: Map::new(),
        }
    }

    pub fn with_delta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.state_delta.insert(key.into(), value);
        self
    }

    /// Deterministic artifact handed out when no generated one is available.
    pub fn fallback(label: &str) -> Self {
        let mut state_delta = Map::new();
        state_delta.insert(
            "quest_progress".to_string(),
            Value::String(format!("You are pursuing: {}", label)),
        );
        state_delta.insert("chapter_conflict_solved".to_string(), Value::Bool(false));
        Self {
            scene: format!(
                "You chose: {}. Through your efforts you make some progress.",
                label
            ),
            next_options: FALLBACK_OPTIONS.iter().map(|s| s.to_string()).collect(),
            state_delta,
        }
    }

    /// Reject artifacts that cannot be shown to a player.
    pub fn validate(&self) -> Result<(), String> {
        if self.scene.trim().is_empty() {
            return Err("scene text is empty".to_string());
        }
        if self.next_options.iter().any(|o| o.trim().is_empty()) {
            return Err("blank next option".to_string());
        }
        Ok(())
    }
}

/// Opaque game state passed through to the generator.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GameState(Value);

impl GameState {
    pub fn new(value: Value) -> Self {
        GameState(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// State as it would be after `artifact` has been played.
    ///
    /// The artifact's delta is merged key by key into the `world` object.
    /// Non-object states are returned unchanged.
    pub fn advanced_by(&self, artifact: &Artifact) -> GameState {
        let mut next = self.0.clone();
        if artifact.state_delta.is_empty() {
            return GameState(next);
        }
        if let Value::Object(root) = &mut next {
            let world = root
                .entry(WORLD_KEY.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !world.is_object() {
                *world = Value::Object(Map::new());
            }
            if let Value::Object(world) = world {
                for (key, value) in &artifact.state_delta {
                    world.insert(key.clone(), value.clone());
                }
            }
        }
        GameState(next)
    }
}

impl From<Value> for GameState {
    fn from(value: Value) -> Self {
        GameState(value)
    }
}
