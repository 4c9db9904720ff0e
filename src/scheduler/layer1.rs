//! Layer1: one speculative worker per visible option, plus priority promotions.

use super::{layer2, Shared};
use crate::cache::entry::{Publish, SpeculativeStart};
use crate::error::GenerationError;
use crate::generator::invoke;
use crate::types::{Artifact, GameState, OptionIndex, SceneId};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Run every option's worker for one scene, then chain layer2.
pub(super) async fn run_pass(shared: Arc<Shared>, scene_id: SceneId, epoch: u64) {
    let start = Instant::now();
    let option_count = {
        let mut inner = shared.cache.lock();
        match inner.live_mut(&scene_id, epoch) {
            Some(entry) => entry.options.len(),
            None => return,
        }
    };

    let limit = shared
        .config
        .layer1_workers
        .map(|n| Arc::new(Semaphore::new(n)));

    let mut workers = JoinSet::new();
    for index in 0..option_count {
        workers.spawn(run_worker(
            Arc::clone(&shared),
            scene_id.clone(),
            epoch,
            index,
            limit.clone(),
        ));
    }
    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            warn!(scene_id = %scene_id, error = %e, "Layer1 worker task ended abnormally");
        }
    }

    let (published, mode) = {
        let mut inner = shared.cache.lock();
        let Some(entry) = inner.live_mut(&scene_id, epoch) else {
            debug!(scene_id = %scene_id, "Scene left the cache during layer1 pass");
            return;
        };
        entry.layer1_active = false;
        let published = entry.layer1.len();
        (published, layer2::launch(&shared, &scene_id, entry))
    };

    info!(
        scene_id = %scene_id,
        published,
        options = option_count,
        layer2 = ?mode,
        elapsed_ms = start.elapsed().as_millis(),
        "Layer1 pass finished"
    );
}

async fn run_worker(
    shared: Arc<Shared>,
    scene_id: SceneId,
    epoch: u64,
    index: OptionIndex,
    limit: Option<Arc<Semaphore>>,
) {
    // Permit before the status check, so a worker queued behind the cap still
    // sees a selection made while it waited.
    let _permit = match limit {
        Some(semaphore) => match semaphore.acquire_owned().await {
            Ok(permit) => Some(permit),
            Err(_) => return,
        },
        None => None,
    };

    let start = {
        let mut inner = shared.cache.lock();
        let Some(entry) = inner.live_mut(&scene_id, epoch) else {
            return;
        };
        entry.begin_speculative(index)
    };

    let (label, state) = match start {
        SpeculativeStart::Started { label, state } => (label, state),
        SpeculativeStart::Cancelled => {
            shared.bump(|s| s.layer1_skipped += 1);
            debug!(
                scene_id = %scene_id,
                index,
                "Skipping layer1 option: another option was selected"
            );
            return;
        }
        other => {
            shared.bump(|s| s.layer1_skipped += 1);
            debug!(scene_id = %scene_id, index, start = ?other, "Layer1 option needs no work");
            return;
        }
    };

    shared.bump(|s| s.layer1_started += 1);
    debug!(scene_id = %scene_id, index, "Layer1 generation started");
    let result = invoke(
        shared.generator.as_ref(),
        index,
        &label,
        &state,
        shared.config.generation_timeout(),
    )
    .await;
    record(&shared, &scene_id, epoch, index, result);
}

/// Generate one selected option. Ownership of the `Generating` status was
/// taken by the selecting caller.
pub(super) async fn run_promotion(
    shared: Arc<Shared>,
    scene_id: SceneId,
    epoch: u64,
    index: OptionIndex,
    label: String,
    state: GameState,
) {
    info!(scene_id = %scene_id, index, "Promoted option to priority generation");
    let result = invoke(
        shared.generator.as_ref(),
        index,
        &label,
        &state,
        shared.config.generation_timeout(),
    )
    .await;
    record(&shared, &scene_id, epoch, index, result);
}

/// Publish or fail a finished generation and wake its waiters. A promotion
/// that lands after the layer1 pass has ended chains layer2 itself.
fn record(
    shared: &Arc<Shared>,
    scene_id: &SceneId,
    epoch: u64,
    index: OptionIndex,
    result: Result<Artifact, GenerationError>,
) {
    let mut inner = shared.cache.lock();
    let Some(entry) = inner.live_mut(scene_id, epoch) else {
        debug!(scene_id = %scene_id, index, "Scene left the cache; dropping layer1 result");
        return;
    };

    match result {
        Ok(artifact) => match entry.complete(index, Arc::new(artifact)) {
            Publish::Published => {
                shared.bump(|s| s.layer1_completed += 1);
                debug!(scene_id = %scene_id, index, "Layer1 artifact published");
                if !entry.layer1_active {
                    layer2::launch(shared, scene_id, entry);
                }
            }
            Publish::Discarded => {
                shared.bump(|s| s.layer1_discarded += 1);
                debug!(
                    scene_id = %scene_id,
                    index,
                    chosen = ?entry.chosen,
                    "Discarded layer1 result for an unchosen option"
                );
            }
        },
        Err(e) => {
            entry.fail(index, &e);
            shared.bump(|s| s.layer1_failed += 1);
            warn!(
                scene_id = %scene_id,
                index,
                error = %e,
                "Layer1 generation failed; option is retryable"
            );
        }
    }
}
