//! Scene cache: `SceneId -> SceneCacheEntry` behind one mutex, bounded by
//! capacity with insertion-order eviction.

use super::entry::{Layer2Mode, OptionStatus, SceneCacheEntry};
use crate::config::CacheConfig;
use crate::types::{Artifact, OptionIndex, SceneId};
use parking_lot::{Mutex, MutexGuard};
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Structural cache state. Only reachable through [`SceneCache::lock`].
#[derive(Debug, Default)]
pub struct CacheInner {
    entries: HashMap<SceneId, SceneCacheEntry>,
    order: VecDeque<SceneId>,
    current: Option<SceneId>,
    next_epoch: u64,
}

impl CacheInner {
    pub fn get(&self, id: &SceneId) -> Option<&SceneCacheEntry> {
        self.entries.get(id)
    }

    pub fn get_mut(&mut self, id: &SceneId) -> Option<&mut SceneCacheEntry> {
        self.entries.get_mut(id)
    }

    /// The entry for `id`, but only if it is the same instance a task captured.
    /// A removed-then-recreated scene gets a new epoch, so orphaned tasks of the
    /// old instance never write into the new one.
    pub fn live_mut(&mut self, id: &SceneId, epoch: u64) -> Option<&mut SceneCacheEntry> {
        self.entries.get_mut(id).filter(|e| e.epoch == epoch)
    }

    pub fn get_or_create(&mut self, id: &SceneId) -> &mut SceneCacheEntry {
        match self.entries.entry(id.clone()) {
            Entry::Occupied(existing) => existing.into_mut(),
            Entry::Vacant(slot) => {
                self.next_epoch += 1;
                self.order.push_back(id.clone());
                debug!(scene_id = %id, epoch = self.next_epoch, "Created scene cache entry");
                slot.insert(SceneCacheEntry::new(self.next_epoch))
            }
        }
    }

    /// Mark the scene currently in play; it is protected from eviction.
    pub fn set_current(&mut self, id: &SceneId) {
        self.current = Some(id.clone());
    }

    fn take(&mut self, id: &SceneId) -> Option<SceneCacheEntry> {
        let entry = self.entries.remove(id)?;
        self.order.retain(|s| s != id);
        Some(entry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Read-only view of one entry
#[derive(Debug, Clone, PartialEq)]
pub struct SceneSnapshot {
    pub epoch: u64,
    pub options: Vec<String>,
    pub statuses: BTreeMap<OptionIndex, OptionStatus>,
    pub layer1: BTreeSet<OptionIndex>,
    pub layer2: BTreeMap<OptionIndex, BTreeSet<OptionIndex>>,
    pub should_cancel_siblings: bool,
    pub chosen: Option<OptionIndex>,
    pub layer1_active: bool,
    pub layer2_generating: bool,
    pub layer2_cancel: bool,
    pub layer2_selected: Option<OptionIndex>,
    pub layer2_mode: Option<Layer2Mode>,
    pub layer2_current: Option<OptionIndex>,
}

impl SceneSnapshot {
    fn of(entry: &SceneCacheEntry) -> Self {
        Self {
            epoch: entry.epoch,
            options: entry.options.clone(),
            statuses: entry.slots.iter().map(|(k, s)| (*k, s.status)).collect(),
            layer1: entry.layer1.keys().copied().collect(),
            layer2: entry
                .layer2
                .iter()
                .map(|(k, m)| (*k, m.keys().copied().collect()))
                .collect(),
            should_cancel_siblings: entry.should_cancel_siblings,
            chosen: entry.chosen,
            layer1_active: entry.layer1_active,
            layer2_generating: entry.lookahead.is_running(),
            layer2_cancel: entry.lookahead.cancel,
            layer2_selected: entry.lookahead.selected,
            layer2_mode: entry.lookahead.mode(),
            layer2_current: entry.lookahead.current(),
        }
    }
}

/// A removed entry's layer2 task, still to be joined
struct Detached {
    scene_id: SceneId,
    task: Option<JoinHandle<()>>,
}

/// Bounded, mutex-guarded scene cache
pub struct SceneCache {
    inner: Mutex<CacheInner>,
    capacity: usize,
    bootstrap: SceneId,
    evict_join_timeout: Duration,
    remove_join_timeout: Duration,
}

impl SceneCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            capacity: config.capacity.max(1),
            bootstrap: SceneId::new(config.bootstrap_scene.clone()),
            evict_join_timeout: Duration::from_millis(config.evict_join_timeout_ms),
            remove_join_timeout: Duration::from_millis(config.remove_join_timeout_ms),
        }
    }

    /// Take the cache mutex. Never hold the guard across an `.await`.
    pub fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn bootstrap(&self) -> &SceneId {
        &self.bootstrap
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn contains(&self, id: &SceneId) -> bool {
        self.inner.lock().entries.contains_key(id)
    }

    /// Cached scene ids, oldest first
    pub fn scene_ids(&self) -> Vec<SceneId> {
        self.inner.lock().order.iter().cloned().collect()
    }

    /// Mark the scene currently in play; it is protected from eviction.
    pub fn set_current(&self, id: &SceneId) {
        self.inner.lock().set_current(id);
    }

    pub fn current(&self) -> Option<SceneId> {
        self.inner.lock().current.clone()
    }

    /// Ids eviction must never remove: the bootstrap scene and the current one.
    pub fn protected_ids(&self) -> BTreeSet<SceneId> {
        let inner = self.inner.lock();
        let mut ids = BTreeSet::from([self.bootstrap.clone()]);
        ids.extend(inner.current.clone());
        ids
    }

    /// Return the entry epoch for `id`, inserting a fresh entry if needed.
    pub fn get_or_create(&self, id: &SceneId) -> u64 {
        self.inner.lock().get_or_create(id).epoch
    }

    pub fn snapshot(&self, id: &SceneId) -> Option<SceneSnapshot> {
        self.inner.lock().get(id).map(SceneSnapshot::of)
    }

    pub fn layer1_artifact(&self, id: &SceneId, index: OptionIndex) -> Option<Arc<Artifact>> {
        self.inner.lock().get(id).and_then(|e| e.layer1(index))
    }

    pub fn layer2_artifact(
        &self,
        id: &SceneId,
        index: OptionIndex,
        sub_index: OptionIndex,
    ) -> Option<Arc<Artifact>> {
        self.inner
            .lock()
            .get(id)
            .and_then(|e| e.layer2(index, sub_index))
    }

    /// Remove the oldest unprotected scenes until `len <= capacity`.
    ///
    /// Entries leave the map under the lock; their layer2 tasks are flagged for
    /// cancellation and joined afterwards with a short bound. Tasks that outlive
    /// the bound are detached; they find their entry gone at the next checkpoint.
    pub async fn evict_if_over_capacity(&self) -> Vec<SceneId> {
        let detached = self.take_overflow();
        let evicted: Vec<SceneId> = detached.iter().map(|d| d.scene_id.clone()).collect();
        if !evicted.is_empty() {
            info!(
                evicted = ?evicted,
                size = self.len(),
                capacity = self.capacity,
                "Evicted scenes over capacity"
            );
        }
        reap(detached, self.evict_join_timeout).await;
        evicted
    }

    fn take_overflow(&self) -> Vec<Detached> {
        let mut inner = self.inner.lock();
        if inner.len() <= self.capacity {
            return Vec::new();
        }
        let excess = inner.len() - self.capacity;
        let victims: Vec<SceneId> = inner
            .order
            .iter()
            .filter(|id| **id != self.bootstrap && inner.current.as_ref() != Some(*id))
            .take(excess)
            .cloned()
            .collect();

        victims
            .into_iter()
            .filter_map(|id| {
                let mut entry = inner.take(&id)?;
                Some(Detached {
                    scene_id: id,
                    task: entry.lookahead.cancel(),
                })
            })
            .collect()
    }

    /// Remove one scene, cancelling and joining its layer2 task with the longer
    /// removal bound. Returns whether the scene was cached.
    pub async fn remove(&self, id: &SceneId) -> bool {
        let detached = {
            let mut inner = self.inner.lock();
            if inner.current.as_ref() == Some(id) {
                inner.current = None;
            }
            inner.take(id).map(|mut entry| Detached {
                scene_id: id.clone(),
                task: entry.lookahead.cancel(),
            })
        };
        let Some(detached) = detached else {
            return false;
        };
        debug!(scene_id = %id, "Removed scene from cache");
        reap(vec![detached], self.remove_join_timeout).await;
        true
    }
}

async fn reap(detached: Vec<Detached>, bound: Duration) {
    for Detached { scene_id, task } in detached {
        let Some(task) = task else { continue };
        if tokio::time::timeout(bound, task).await.is_err() {
            warn!(
                scene_id = %scene_id,
                bound_ms = bound.as_millis(),
                "Layer2 task did not stop in time; leaving it detached"
            );
        }
    }
}
