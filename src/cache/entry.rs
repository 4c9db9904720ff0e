//! Per-scene cache entry.
//!
//! Holds published artifacts, per-option status, wait gates and layer2 control.
//! Every status transition lives here so workers and the coordinator never
//! re-derive "is someone already on it" at their call sites. All methods are
//! called with the cache mutex held.

use super::gate::{GateTicket, WaitGate};
use crate::error::GenerationError;
use crate::types::{Artifact, GameState, OptionIndex};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Generation status of one option
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionStatus {
    /// Not started, or reset after a failed attempt
    Pending,
    /// Exactly one task is producing this artifact
    Generating,
    /// Artifact published in layer1
    Completed,
    /// A selection gave up on this option after exhausting its attempts.
    /// Retryable like `Pending`.
    Failed,
}

impl OptionStatus {
    fn is_startable(self) -> bool {
        matches!(self, OptionStatus::Pending | OptionStatus::Failed)
    }
}

#[derive(Debug)]
pub(crate) struct OptionSlot {
    pub(crate) status: OptionStatus,
    pub(crate) gate: WaitGate,
    pub(crate) attempts: u32,
    pub(crate) last_error: Option<String>,
    /// A selector holds a ticket for the attempt in flight
    pub(crate) claimed: bool,
}

impl OptionSlot {
    fn new() -> Self {
        Self {
            status: OptionStatus::Pending,
            gate: WaitGate::new(),
            attempts: 0,
            last_error: None,
            claimed: false,
        }
    }
}

/// Result of a speculative (layer1 worker) start attempt
#[derive(Debug)]
pub(crate) enum SpeculativeStart {
    /// Caller now owns the generation and must call `complete` or `fail`
    Started { label: String, state: GameState },
    AlreadyCompleted,
    /// Another task performed the Pending -> Generating transition
    OwnedElsewhere,
    /// A selection was made while this option was still pending
    Cancelled,
}

/// Result of resolving a selected option
#[derive(Debug)]
pub(crate) enum PriorityStart {
    Ready(Arc<Artifact>),
    /// Someone else is generating it; wait on the ticket then re-check
    Wait(GateTicket),
    /// Caller owns a promoted generation and must call `complete` or `fail`
    Promote {
        ticket: GateTicket,
        label: String,
        state: GameState,
    },
    /// The caller may not promote again; the option is now `Failed`
    Exhausted { last_error: Option<String> },
    OutOfRange { len: usize },
}

/// What happened to a finished layer1 generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Publish {
    Published,
    /// A different option has been selected; result dropped
    Discarded,
}

/// Which layer1 indices a layer2 pass covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer2Mode {
    /// No selection known: every completed layer1 option
    Broad,
    /// The player picked this index: only its sub-options
    Narrow(OptionIndex),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Layer2Phase {
    Idle,
    Running {
        run: u64,
        mode: Layer2Mode,
        current: Option<OptionIndex>,
    },
}

/// What a selection asks of the layer2 pass
#[derive(Debug)]
pub(crate) enum Steer {
    /// Nothing running; the next pass will be narrow
    Idle,
    /// Running pass already covers the selection
    Continue,
    /// Running pass was cancelled; join this handle (bounded)
    Cancelled(Option<JoinHandle<()>>),
}

/// Layer2 state machine: `Idle <-> Running(mode)` with a cooperative cancel flag.
#[derive(Debug)]
pub(crate) struct Layer2Control {
    pub(crate) phase: Layer2Phase,
    pub(crate) cancel: bool,
    pub(crate) selected: Option<OptionIndex>,
    pub(crate) task: Option<JoinHandle<()>>,
    /// Indices whose layer2 generation ran to completion (published or failed)
    pub(crate) attempted: BTreeSet<OptionIndex>,
    next_run: u64,
}

impl Layer2Control {
    fn new() -> Self {
        Self {
            phase: Layer2Phase::Idle,
            cancel: false,
            selected: None,
            task: None,
            attempted: BTreeSet::new(),
            next_run: 1,
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        matches!(self.phase, Layer2Phase::Running { .. })
    }

    pub(crate) fn mode(&self) -> Option<Layer2Mode> {
        match self.phase {
            Layer2Phase::Running { mode, .. } => Some(mode),
            Layer2Phase::Idle => None,
        }
    }

    /// Layer1 index the running pass is expanding right now
    pub(crate) fn current(&self) -> Option<OptionIndex> {
        match self.phase {
            Layer2Phase::Running { current, .. } => current,
            Layer2Phase::Idle => None,
        }
    }

    /// Whether a pass may keep working on `index`.
    pub(crate) fn may_proceed(&self, run: u64, index: OptionIndex) -> bool {
        match self.phase {
            Layer2Phase::Running { run: active, .. } if active == run => {
                !self.cancel && self.selected.map_or(true, |s| s == index)
            }
            _ => false,
        }
    }

    pub(crate) fn set_current(&mut self, run: u64, index: Option<OptionIndex>) {
        if let Layer2Phase::Running {
            run: active,
            current,
            ..
        } = &mut self.phase
        {
            if *active == run {
                *current = index;
            }
        }
    }

    /// Apply a player selection to the layer2 machine.
    pub(crate) fn steer(&mut self, index: OptionIndex) -> Steer {
        self.selected = Some(index);
        match self.phase {
            Layer2Phase::Idle => {
                self.cancel = false;
                Steer::Idle
            }
            Layer2Phase::Running { mode, current, .. } => {
                if current == Some(index) || mode == Layer2Mode::Narrow(index) {
                    Steer::Continue
                } else {
                    self.cancel = true;
                    Steer::Cancelled(self.task.take())
                }
            }
        }
    }

    /// Set the cancel flag and hand back the task handle, if any.
    pub(crate) fn cancel(&mut self) -> Option<JoinHandle<()>> {
        if self.is_running() {
            self.cancel = true;
        }
        self.task.take()
    }

    /// Return to `Idle` if `run` is the active pass.
    pub(crate) fn finish(&mut self, run: u64) -> bool {
        match self.phase {
            Layer2Phase::Running { run: active, .. } if active == run => {
                self.phase = Layer2Phase::Idle;
                self.task = None;
                true
            }
            _ => false,
        }
    }
}

/// All cached state for one scene
#[derive(Debug)]
pub struct SceneCacheEntry {
    pub(crate) epoch: u64,
    pub(crate) options: Vec<String>,
    pub(crate) state: GameState,
    pub(crate) slots: BTreeMap<OptionIndex, OptionSlot>,
    pub(crate) layer1: BTreeMap<OptionIndex, Arc<Artifact>>,
    pub(crate) layer2: BTreeMap<OptionIndex, BTreeMap<OptionIndex, Arc<Artifact>>>,
    pub(crate) should_cancel_siblings: bool,
    pub(crate) chosen: Option<OptionIndex>,
    pub(crate) layer1_active: bool,
    pub(crate) lookahead: Layer2Control,
}

impl SceneCacheEntry {
    pub(crate) fn new(epoch: u64) -> Self {
        Self {
            epoch,
            options: Vec::new(),
            state: GameState::default(),
            slots: BTreeMap::new(),
            layer1: BTreeMap::new(),
            layer2: BTreeMap::new(),
            should_cancel_siblings: false,
            chosen: None,
            layer1_active: false,
            lookahead: Layer2Control::new(),
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn options(&self) -> &[String] {
        &self.options
    }

    pub fn status(&self, index: OptionIndex) -> OptionStatus {
        self.slots
            .get(&index)
            .map(|s| s.status)
            .unwrap_or(OptionStatus::Pending)
    }

    pub fn layer1(&self, index: OptionIndex) -> Option<Arc<Artifact>> {
        self.layer1.get(&index).cloned()
    }

    pub fn layer2(&self, index: OptionIndex, sub_index: OptionIndex) -> Option<Arc<Artifact>> {
        self.layer2.get(&index).and_then(|m| m.get(&sub_index)).cloned()
    }

    pub fn layer2_generating(&self) -> bool {
        self.lookahead.is_running()
    }

    /// Record the scene's options and state, creating a slot and gate for
    /// every index not seen before. Returns the number of new slots.
    pub(crate) fn prepare(&mut self, options: &[String], state: &GameState) -> usize {
        if self.options.is_empty() {
            self.options = options.to_vec();
            self.state = state.clone();
        }
        let mut added = 0;
        for index in 0..self.options.len() {
            self.slots.entry(index).or_insert_with(|| {
                added += 1;
                OptionSlot::new()
            });
        }
        added
    }

    fn slot_mut(&mut self, index: OptionIndex) -> &mut OptionSlot {
        self.slots.entry(index).or_insert_with(OptionSlot::new)
    }

    /// Layer1 worker entry point: the Pending -> Generating check-and-set
    /// together with the read of `should_cancel_siblings`.
    pub(crate) fn begin_speculative(&mut self, index: OptionIndex) -> SpeculativeStart {
        let cancel_siblings = self.should_cancel_siblings;
        let label = self.options.get(index).cloned().unwrap_or_default();
        let state = self.state.clone();
        let slot = self.slot_mut(index);
        let status = slot.status;
        match status {
            OptionStatus::Completed => SpeculativeStart::AlreadyCompleted,
            OptionStatus::Generating => SpeculativeStart::OwnedElsewhere,
            s if s.is_startable() && cancel_siblings => SpeculativeStart::Cancelled,
            _ => {
                slot.status = OptionStatus::Generating;
                slot.attempts += 1;
                SpeculativeStart::Started { label, state }
            }
        }
    }

    /// Selection entry point. Marks the selection, then either returns the
    /// published artifact, a ticket to wait on, or ownership of a promotion.
    /// With `may_promote` false a startable option is given up instead.
    pub(crate) fn begin_priority(&mut self, index: OptionIndex, may_promote: bool) -> PriorityStart {
        if index >= self.options.len() {
            return PriorityStart::OutOfRange {
                len: self.options.len(),
            };
        }
        self.should_cancel_siblings = true;
        self.chosen = Some(index);

        if let Some(artifact) = self.layer1.get(&index) {
            return PriorityStart::Ready(Arc::clone(artifact));
        }

        let label = self.options[index].clone();
        let state = self.state.clone();
        let slot = self.slot_mut(index);
        let status = slot.status;
        match status {
            OptionStatus::Generating => {
                slot.claimed = true;
                PriorityStart::Wait(slot.gate.ticket())
            }
            _ if !may_promote => {
                slot.status = OptionStatus::Failed;
                PriorityStart::Exhausted {
                    last_error: slot.last_error.clone(),
                }
            }
            _ => {
                slot.status = OptionStatus::Generating;
                slot.attempts += 1;
                slot.claimed = true;
                PriorityStart::Promote {
                    ticket: slot.gate.ticket(),
                    label,
                    state,
                }
            }
        }
    }

    /// Publish a finished generation. Only valid while `Generating`. A result
    /// for an unchosen option is dropped unless a selector is waiting on it.
    pub(crate) fn complete(&mut self, index: OptionIndex, artifact: Arc<Artifact>) -> Publish {
        let chosen = self.chosen;
        let slot = self.slot_mut(index);
        let claimed = std::mem::take(&mut slot.claimed);
        let unchosen = chosen.is_some_and(|c| c != index) && !claimed;
        if slot.status != OptionStatus::Generating || unchosen {
            if slot.status == OptionStatus::Generating {
                slot.status = OptionStatus::Pending;
            }
            slot.gate.signal();
            return Publish::Discarded;
        }
        slot.status = OptionStatus::Completed;
        slot.last_error = None;
        self.layer1.insert(index, artifact);
        if let Some(slot) = self.slots.get(&index) {
            slot.gate.signal();
        }
        Publish::Published
    }

    /// Record a failed generation; the option becomes retryable and waiters wake.
    pub(crate) fn fail(&mut self, index: OptionIndex, error: &GenerationError) {
        let slot = self.slot_mut(index);
        if slot.status == OptionStatus::Generating {
            slot.status = OptionStatus::Pending;
        }
        slot.claimed = false;
        slot.last_error = Some(error.to_string());
        slot.gate.signal();
    }

    /// Drop every artifact except those for `index`.
    pub(crate) fn retain_selected(&mut self, index: OptionIndex) -> (usize, usize) {
        let before1 = self.layer1.len();
        let before2 = self.layer2.len();
        self.layer1.retain(|k, _| *k == index);
        self.layer2.retain(|k, _| *k == index);
        for (k, slot) in self.slots.iter_mut() {
            if *k != index && slot.status == OptionStatus::Completed {
                slot.status = OptionStatus::Pending;
            }
        }
        (before1 - self.layer1.len(), before2 - self.layer2.len())
    }

    /// Whether a narrow layer2 pass for `index` would have work to do.
    pub(crate) fn layer2_eligible(&self, index: OptionIndex) -> bool {
        self.layer1
            .get(&index)
            .is_some_and(|a| !a.next_options.is_empty())
            && !self.layer2.contains_key(&index)
            && !self.lookahead.attempted.contains(&index)
    }

    /// Decide the mode of the next layer2 pass, if one is worth starting.
    /// A known selection (steered or merely chosen) narrows the pass.
    pub(crate) fn plan_layer2(&self) -> Option<Layer2Mode> {
        if self.lookahead.is_running() || self.layer1_active {
            return None;
        }
        match self.lookahead.selected.or(self.chosen) {
            Some(index) => self
                .layer2_eligible(index)
                .then_some(Layer2Mode::Narrow(index)),
            None => self
                .layer1
                .keys()
                .any(|k| self.layer2_eligible(*k))
                .then_some(Layer2Mode::Broad),
        }
    }

    /// Enter `Running(mode)` and return the run id.
    pub(crate) fn launch_layer2(&mut self, mode: Layer2Mode) -> u64 {
        let run = self.lookahead.next_run;
        self.lookahead.next_run += 1;
        self.lookahead.cancel = false;
        self.lookahead.phase = Layer2Phase::Running {
            run,
            mode,
            current: None,
        };
        run
    }

    /// Layer1 artifacts a pass in `mode` should expand, in index order.
    pub(crate) fn layer2_targets(&self, mode: Layer2Mode) -> Vec<(OptionIndex, Arc<Artifact>)> {
        self.layer1
            .iter()
            .filter(|(k, _)| match mode {
                Layer2Mode::Broad => true,
                Layer2Mode::Narrow(index) => **k == index,
            })
            .filter(|(k, _)| self.layer2_eligible(**k))
            .map(|(k, a)| (*k, Arc::clone(a)))
            .collect()
    }

    /// Store one index's sub-option artifacts.
    pub(crate) fn publish_layer2(
        &mut self,
        index: OptionIndex,
        artifacts: BTreeMap<OptionIndex, Arc<Artifact>>,
    ) {
        self.lookahead.attempted.insert(index);
        if !artifacts.is_empty() {
            self.layer2.insert(index, artifacts);
        }
    }
}
