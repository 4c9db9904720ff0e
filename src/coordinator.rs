//! Request Coordinator
//!
//! The boundary invoked by request-handling code: start pregeneration for a
//! scene, resolve a player's selection (cache hit, wait, or promotion), and
//! clean up behind the player afterwards. Selections never fail; when no
//! generated artifact can be produced in time the deterministic fallback is
//! returned and the outcome says why.

use crate::cache::entry::{PriorityStart, Steer};
use crate::cache::SceneCache;
use crate::config::PrescientConfig;
use crate::error::{GenerationError, PregenError};
use crate::generator::ArtifactGenerator;
use crate::scheduler::{GenerationScheduler, SchedulerStats};
use crate::types::{Artifact, GameState, OptionIndex, SceneId};
use serde::Serialize;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Why a selection was answered with the fallback artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FallbackReason {
    /// The bounded wait expired
    Timeout,
    /// Every permitted generation attempt failed
    Failed,
    /// The scene is not cached and the bootstrap scene has nothing for the index
    Stale,
    OutOfRange,
}

/// How a selection was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SelectionOutcome {
    /// Already published when the selection arrived
    Cached,
    /// Another task was generating it; the caller waited
    Awaited,
    /// The selection promoted the option to priority generation
    Promoted,
    /// Scene not cached; served from the bootstrap scene
    Bootstrap,
    Fallback { reason: FallbackReason },
}

/// Result of [`RequestCoordinator::select_option`]
#[derive(Debug, Clone)]
pub struct Selection {
    pub artifact: Arc<Artifact>,
    pub outcome: SelectionOutcome,
}

impl Selection {
    pub fn is_fallback(&self) -> bool {
        matches!(self.outcome, SelectionOutcome::Fallback { .. })
    }

    /// The timeout signal: the wait expired and the artifact is the fallback.
    pub fn timed_out(&self) -> bool {
        self.outcome
            == SelectionOutcome::Fallback {
                reason: FallbackReason::Timeout,
            }
    }
}

/// Entry point for request handlers
pub struct RequestCoordinator {
    scheduler: GenerationScheduler,
}

impl RequestCoordinator {
    pub fn new(generator: Arc<dyn ArtifactGenerator>, config: &PrescientConfig) -> Self {
        let cache = Arc::new(SceneCache::new(&config.cache));
        Self {
            scheduler: GenerationScheduler::new(cache, generator, config.scheduler.clone()),
        }
    }

    pub fn scheduler(&self) -> &GenerationScheduler {
        &self.scheduler
    }

    pub fn cache(&self) -> &Arc<SceneCache> {
        self.scheduler.cache()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    /// See [`GenerationScheduler::start_pregeneration`].
    pub async fn start_pregeneration(
        &self,
        scene_id: Option<SceneId>,
        options: Vec<String>,
        state: GameState,
    ) -> SceneId {
        self.scheduler
            .start_pregeneration(scene_id, options, state)
            .await
    }

    /// Non-blocking lookup of a second-tier artifact. Never generates.
    pub fn fetch_layer2(
        &self,
        scene_id: &SceneId,
        index: OptionIndex,
        sub_index: OptionIndex,
    ) -> Option<Arc<Artifact>> {
        self.cache().layer2_artifact(scene_id, index, sub_index)
    }

    /// Resolve the player's choice of `index` in `scene_id`.
    ///
    /// Afterwards only the chosen option's artifacts stay cached for the
    /// scene, any layer2 work for other options is cancelled, and
    /// `previous`, unless it is this scene or the bootstrap scene, is removed.
    pub async fn select_option(
        &self,
        scene_id: &SceneId,
        index: OptionIndex,
        previous: Option<&SceneId>,
    ) -> Selection {
        let start = Instant::now();
        let label = self
            .cache()
            .lock()
            .get(scene_id)
            .and_then(|e| e.options().get(index).cloned());

        let selection = match self.resolve(scene_id, index).await {
            Ok((artifact, outcome)) => Selection { artifact, outcome },
            Err(e @ PregenError::StaleReference(_)) => {
                let bootstrap = self.cache().bootstrap();
                match self.cache().layer1_artifact(bootstrap, index) {
                    Some(artifact) => {
                        info!(
                            scene_id = %scene_id,
                            index,
                            bootstrap = %bootstrap,
                            "Scene not cached; serving bootstrap artifact"
                        );
                        Selection {
                            artifact,
                            outcome: SelectionOutcome::Bootstrap,
                        }
                    }
                    None => self.fallback(scene_id, index, label, FallbackReason::Stale, &e),
                }
            }
            Err(e) => {
                let reason = match e {
                    PregenError::Timeout { .. } => FallbackReason::Timeout,
                    PregenError::OptionOutOfRange { .. } => FallbackReason::OutOfRange,
                    _ => FallbackReason::Failed,
                };
                self.fallback(scene_id, index, label, reason, &e)
            }
        };

        self.steer_layer2(scene_id, index).await;
        self.cleanup(scene_id, index, previous).await;

        info!(
            scene_id = %scene_id,
            index,
            outcome = ?selection.outcome,
            elapsed_ms = start.elapsed().as_millis(),
            "Option selected"
        );
        selection
    }

    /// Wait, promote and re-check until the option is published, attempts are
    /// exhausted, or the selection deadline passes.
    async fn resolve(
        &self,
        scene_id: &SceneId,
        index: OptionIndex,
    ) -> Result<(Arc<Artifact>, SelectionOutcome), PregenError> {
        let config = self.scheduler.config();
        let start = Instant::now();
        let deadline = start + config.select_timeout();
        let mut promotions = 0u32;
        let mut waited = false;

        loop {
            let (epoch, step) = {
                let mut inner = self.cache().lock();
                let entry = inner
                    .get_mut(scene_id)
                    .ok_or_else(|| PregenError::StaleReference(scene_id.clone()))?;
                let may_promote = promotions < config.max_select_attempts;
                (entry.epoch(), entry.begin_priority(index, may_promote))
            };

            let ticket = match step {
                PriorityStart::Ready(artifact) => {
                    let outcome = if promotions > 0 {
                        SelectionOutcome::Promoted
                    } else if waited {
                        SelectionOutcome::Awaited
                    } else {
                        SelectionOutcome::Cached
                    };
                    return Ok((artifact, outcome));
                }
                PriorityStart::OutOfRange { len } => {
                    return Err(PregenError::OptionOutOfRange {
                        scene_id: scene_id.clone(),
                        index,
                        len,
                    })
                }
                PriorityStart::Exhausted { last_error } => {
                    return Err(PregenError::Generation(GenerationError::Failed(
                        last_error.unwrap_or_else(|| "no attempt succeeded".to_string()),
                    )))
                }
                PriorityStart::Wait(ticket) => {
                    debug!(scene_id = %scene_id, index, "Waiting for in-flight generation");
                    ticket
                }
                PriorityStart::Promote {
                    ticket,
                    label,
                    state,
                } => {
                    promotions += 1;
                    debug!(
                        scene_id = %scene_id,
                        index,
                        attempt = promotions,
                        "Promoting option"
                    );
                    self.scheduler
                        .spawn_promotion(scene_id, epoch, index, label, state);
                    ticket
                }
            };

            waited = true;
            let remaining = deadline.saturating_duration_since(Instant::now());
            if ticket.wait(remaining).await.is_none() {
                return Err(PregenError::Timeout {
                    scene_id: scene_id.clone(),
                    index,
                    waited: start.elapsed(),
                });
            }
        }
    }

    /// Point the scene's layer2 machine at the selection: cancel and join a
    /// pass working on another option, then make sure a narrow pass runs.
    async fn steer_layer2(&self, scene_id: &SceneId, index: OptionIndex) {
        let steer = {
            let mut inner = self.cache().lock();
            match inner.get_mut(scene_id) {
                Some(entry) if index < entry.options().len() => entry.lookahead.steer(index),
                _ => return,
            }
        };

        if let Steer::Cancelled(task) = steer {
            info!(scene_id = %scene_id, index, "Cancelling layer2 pass for other options");
            if let Some(task) = task {
                let bound = self.scheduler.config().layer2_join_timeout();
                if tokio::time::timeout(bound, task).await.is_err() {
                    warn!(
                        scene_id = %scene_id,
                        bound_ms = bound.as_millis(),
                        "Layer2 pass did not stop in time; leaving it detached"
                    );
                }
            }
        }

        if let Some(mode) = self.scheduler.ensure_layer2(scene_id) {
            debug!(scene_id = %scene_id, mode = ?mode, "Started layer2 pass for selection");
        }
    }

    async fn cleanup(&self, scene_id: &SceneId, index: OptionIndex, previous: Option<&SceneId>) {
        let dropped = {
            let mut inner = self.cache().lock();
            let dropped = match inner.get_mut(scene_id) {
                Some(entry) if index < entry.options().len() => Some(entry.retain_selected(index)),
                _ => None,
            };
            if dropped.is_some() {
                inner.set_current(scene_id);
            }
            dropped
        };
        if let Some((layer1, layer2)) = dropped {
            debug!(
                scene_id = %scene_id,
                index,
                layer1_dropped = layer1,
                layer2_dropped = layer2,
                "Dropped artifacts for unchosen options"
            );
        }

        if let Some(previous) = previous {
            if previous != scene_id
                && previous != self.cache().bootstrap()
                && self.cache().remove(previous).await
            {
                info!(previous = %previous, "Removed previous scene from cache");
            }
        }

        self.cache().evict_if_over_capacity().await;
    }

    fn fallback(
        &self,
        scene_id: &SceneId,
        index: OptionIndex,
        label: Option<String>,
        reason: FallbackReason,
        error: &PregenError,
    ) -> Selection {
        self.scheduler.record_fallback();
        let label = label.unwrap_or_else(|| format!("option {}", index.saturating_add(1)));
        warn!(
            scene_id = %scene_id,
            index,
            reason = ?reason,
            error = %error,
            "Serving fallback artifact"
        );
        Selection {
            artifact: Arc::new(Artifact::fallback(&label)),
            outcome: SelectionOutcome::Fallback { reason },
        }
    }
}
