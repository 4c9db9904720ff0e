//! Scheduler counters.

use serde::Serialize;

/// Running totals across all scenes since the scheduler was created
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    /// Layer1 worker generations started (speculative, not promotions)
    pub layer1_started: usize,
    /// Layer1 artifacts published, including promotions
    pub layer1_completed: usize,
    /// Layer1 generations that failed, including promotions
    pub layer1_failed: usize,
    /// Layer1 workers that found nothing to do or were cancelled
    pub layer1_skipped: usize,
    /// Layer1 results dropped because a different option was chosen
    pub layer1_discarded: usize,
    /// Priority promotions spawned by selections
    pub promotions: usize,
    /// Layer1 indices whose sub-options were published
    pub layer2_published: usize,
    /// Layer2 passes stopped at a checkpoint
    pub layer2_cancelled: usize,
    /// Selections answered with the fallback artifact
    pub fallbacks: usize,
}
