//! Generation Scheduler
//!
//! Drives the layer1 worker pass for a scene (one task per option, submitted in
//! index order), spawns priority promotions for selected options, and runs the
//! single background layer2 pass per scene with cooperative cancellation.
//!
//! The generator is always called with the cache mutex released.

mod layer1;
mod layer2;
pub mod stats;

pub use stats::SchedulerStats;

use crate::cache::{Layer2Mode, OptionStatus, SceneCache};
use crate::config::SchedulerConfig;
use crate::generator::ArtifactGenerator;
use crate::types::{GameState, OptionIndex, SceneId};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

const IDLE_POLL: Duration = Duration::from_millis(10);

/// State shared by the scheduler handle and every task it spawns
pub(crate) struct Shared {
    pub(crate) cache: Arc<SceneCache>,
    pub(crate) generator: Arc<dyn ArtifactGenerator>,
    pub(crate) config: SchedulerConfig,
    stats: RwLock<SchedulerStats>,
}

impl Shared {
    pub(crate) fn bump(&self, update: impl FnOnce(&mut SchedulerStats)) {
        update(&mut self.stats.write());
    }
}

/// Cloneable handle to the scheduler
#[derive(Clone)]
pub struct GenerationScheduler {
    shared: Arc<Shared>,
}

impl GenerationScheduler {
    pub fn new(
        cache: Arc<SceneCache>,
        generator: Arc<dyn ArtifactGenerator>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                cache,
                generator,
                config,
                stats: RwLock::new(SchedulerStats::default()),
            }),
        }
    }

    pub fn cache(&self) -> &Arc<SceneCache> {
        &self.shared.cache
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    pub fn stats(&self) -> SchedulerStats {
        self.shared.stats.read().clone()
    }

    pub(crate) fn record_fallback(&self) {
        self.shared.bump(|s| s.fallbacks += 1);
    }

    /// Begin layer1 (and chained layer2) generation for a scene.
    ///
    /// Without an explicit id one is derived from `state` and `options`. The
    /// scene becomes the current one. Calling again while the scene's layer1
    /// pass is still running does not start a second pass. Returns the scene id.
    pub async fn start_pregeneration(
        &self,
        scene_id: Option<SceneId>,
        options: Vec<String>,
        state: GameState,
    ) -> SceneId {
        let scene_id = scene_id.unwrap_or_else(|| SceneId::derive(&state, &options));

        let epoch = {
            let mut inner = self.shared.cache.lock();
            inner.set_current(&scene_id);
            let entry = inner.get_or_create(&scene_id);
            let added = entry.prepare(&options, &state);
            if entry.layer1_active {
                debug!(scene_id = %scene_id, "Layer1 pass already running");
                None
            } else {
                entry.layer1_active = true;
                debug!(
                    scene_id = %scene_id,
                    options = entry.options.len(),
                    new_slots = added,
                    "Prepared scene for pregeneration"
                );
                Some(entry.epoch)
            }
        };

        if let Some(epoch) = epoch {
            info!(
                scene_id = %scene_id,
                options = options.len(),
                "Starting layer1 pregeneration"
            );
            tokio::spawn(layer1::run_pass(
                Arc::clone(&self.shared),
                scene_id.clone(),
                epoch,
            ));
        }

        self.shared.cache.evict_if_over_capacity().await;
        scene_id
    }

    /// Generate a selected option at priority. The caller has already moved the
    /// option to `Generating` and holds a ticket on its gate.
    pub(crate) fn spawn_promotion(
        &self,
        scene_id: &SceneId,
        epoch: u64,
        index: OptionIndex,
        label: String,
        state: GameState,
    ) {
        self.shared.bump(|s| s.promotions += 1);
        tokio::spawn(layer1::run_promotion(
            Arc::clone(&self.shared),
            scene_id.clone(),
            epoch,
            index,
            label,
            state,
        ));
    }

    /// Start a layer2 pass for the scene if one is due and none is running.
    pub(crate) fn ensure_layer2(&self, scene_id: &SceneId) -> Option<Layer2Mode> {
        let mut inner = self.shared.cache.lock();
        let entry = inner.get_mut(scene_id)?;
        layer2::launch(&self.shared, scene_id, entry)
    }

    /// Poll until the scene has no running layer1 pass, no option in
    /// `Generating` and no layer2 pass. Returns false on timeout or if the
    /// scene is not cached.
    pub async fn wait_for_idle(&self, scene_id: &SceneId, timeout: Duration) -> bool {
        let start = Instant::now();
        loop {
            let Some(snapshot) = self.shared.cache.snapshot(scene_id) else {
                return false;
            };
            let busy = snapshot.layer1_active
                || snapshot.layer2_generating
                || snapshot
                    .statuses
                    .values()
                    .any(|s| *s == OptionStatus::Generating);
            if !busy {
                return true;
            }
            if start.elapsed() >= timeout {
                return false;
            }
            sleep(IDLE_POLL).await;
        }
    }
}
