//! Layer2: one-ply lookahead over the sub-options of published layer1 artifacts.
//!
//! A pass runs in broad mode (every eligible layer1 index) or narrow mode (the
//! selected index only). It polls the entry's cancel flag and selection before
//! each per-index generation and again before publishing.

use super::Shared;
use crate::cache::{Layer2Mode, SceneCacheEntry};
use crate::error::GenerationError;
use crate::generator::invoke;
use crate::types::{Artifact, GameState, OptionIndex, SceneId};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info};

/// Start a pass for `entry` if one is due. Called with the cache mutex held;
/// the task handle is stored before the mutex is released.
pub(super) fn launch(
    shared: &Arc<Shared>,
    scene_id: &SceneId,
    entry: &mut SceneCacheEntry,
) -> Option<Layer2Mode> {
    if !shared.config.layer2_enabled {
        return None;
    }
    let mode = entry.plan_layer2()?;
    let run = entry.launch_layer2(mode);
    let targets = entry.layer2_targets(mode);
    let base_state = entry.state.clone();

    debug!(
        scene_id = %scene_id,
        mode = ?mode,
        run,
        targets = targets.len(),
        "Launching layer2 pass"
    );
    let task = tokio::spawn(run_pass(
        Arc::clone(shared),
        scene_id.clone(),
        entry.epoch,
        run,
        mode,
        targets,
        base_state,
    ));
    entry.lookahead.task = Some(task);
    Some(mode)
}

/// Returns the entry to idle however the pass ends.
struct PassGuard {
    shared: Arc<Shared>,
    scene_id: SceneId,
    epoch: u64,
    run: u64,
    armed: bool,
}

impl PassGuard {
    /// Leave `Running` and start a follow-up pass (narrow, after a cancelled
    /// broad pass) in the same critical section.
    fn complete(mut self) -> Option<Layer2Mode> {
        self.armed = false;
        let mut inner = self.shared.cache.lock();
        let entry = inner.live_mut(&self.scene_id, self.epoch)?;
        if !entry.lookahead.finish(self.run) {
            return None;
        }
        launch(&self.shared, &self.scene_id, entry)
    }
}

impl Drop for PassGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut inner = self.shared.cache.lock();
        if let Some(entry) = inner.live_mut(&self.scene_id, self.epoch) {
            entry.lookahead.finish(self.run);
        }
    }
}

async fn run_pass(
    shared: Arc<Shared>,
    scene_id: SceneId,
    epoch: u64,
    run: u64,
    mode: Layer2Mode,
    targets: Vec<(OptionIndex, Arc<Artifact>)>,
    base_state: GameState,
) {
    let start = Instant::now();
    let guard = PassGuard {
        shared: Arc::clone(&shared),
        scene_id: scene_id.clone(),
        epoch,
        run,
        armed: true,
    };

    let published = expand(&shared, &scene_id, epoch, run, targets, base_state).await;
    let follow_up = guard.complete();

    info!(
        scene_id = %scene_id,
        mode = ?mode,
        published,
        follow_up = ?follow_up,
        elapsed_ms = start.elapsed().as_millis(),
        "Layer2 pass finished"
    );
}

/// Generate and publish sub-options for each target. Returns the number of
/// layer1 indices published before the pass ended or was cancelled.
async fn expand(
    shared: &Shared,
    scene_id: &SceneId,
    epoch: u64,
    run: u64,
    targets: Vec<(OptionIndex, Arc<Artifact>)>,
    base_state: GameState,
) -> usize {
    let mut published = 0;

    for (index, artifact) in targets {
        if !checkpoint(shared, scene_id, epoch, run, index) {
            return published;
        }

        let state = base_state.advanced_by(&artifact);
        let calls = artifact
            .next_options
            .iter()
            .enumerate()
            .map(|(sub_index, label)| {
                invoke(
                    shared.generator.as_ref(),
                    sub_index,
                    label,
                    &state,
                    shared.config.generation_timeout(),
                )
            });
        let results = join_all(calls).await;

        match publish(shared, scene_id, epoch, run, index, results) {
            Some(true) => published += 1,
            Some(false) => {}
            None => return published,
        }
    }

    published
}

/// Cancellation checkpoint after a per-index generation, then publish.
/// Returns `None` if the pass must stop, otherwise whether anything was stored.
fn publish(
    shared: &Shared,
    scene_id: &SceneId,
    epoch: u64,
    run: u64,
    index: OptionIndex,
    results: Vec<Result<Artifact, GenerationError>>,
) -> Option<bool> {
    let mut inner = shared.cache.lock();
    let entry = inner.live_mut(scene_id, epoch)?;
    if !entry.lookahead.may_proceed(run, index) {
        shared.bump(|s| s.layer2_cancelled += 1);
        debug!(
            scene_id = %scene_id,
            index,
            checkpoint = "before publish",
            "Layer2 pass cancelled; discarding result"
        );
        return None;
    }

    let attempted = results.len();
    let artifacts: BTreeMap<OptionIndex, Arc<Artifact>> = results
        .into_iter()
        .enumerate()
        .filter_map(|(sub_index, result)| result.ok().map(|a| (sub_index, Arc::new(a))))
        .collect();
    let generated = artifacts.len();
    entry.publish_layer2(index, artifacts);
    entry.lookahead.set_current(run, None);
    if generated > 0 {
        shared.bump(|s| s.layer2_published += 1);
    }
    debug!(
        scene_id = %scene_id,
        index,
        generated,
        failed = attempted - generated,
        "Layer2 sub-options published"
    );
    Some(generated > 0)
}

/// Cancellation checkpoint before a per-index generation. Marks `index` as
/// the one in progress when the pass may continue.
fn checkpoint(
    shared: &Shared,
    scene_id: &SceneId,
    epoch: u64,
    run: u64,
    index: OptionIndex,
) -> bool {
    let mut inner = shared.cache.lock();
    let Some(entry) = inner.live_mut(scene_id, epoch) else {
        debug!(scene_id = %scene_id, "Scene left the cache; stopping layer2 pass");
        return false;
    };
    if !entry.lookahead.may_proceed(run, index) {
        shared.bump(|s| s.layer2_cancelled += 1);
        debug!(
            scene_id = %scene_id,
            index,
            checkpoint = "before generation",
            "Layer2 pass cancelled"
        );
        return false;
    }
    entry.lookahead.set_current(run, Some(index));
    true
}
