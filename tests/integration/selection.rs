//! Integration tests for option selection: resolution, fallback and cleanup

use crate::integration::test_utils::*;
use prescient::cache::OptionStatus;
use prescient::coordinator::FallbackReason;
use prescient::{Artifact, SelectionOutcome};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

#[tokio::test(start_paused = true)]
async fn test_repeated_selection_is_idempotent() {
    let generator = Arc::new(ScriptedGenerator::new(2));
    let coordinator = coordinator(&generator, &layer1_only_config());

    let id = start(&coordinator, "s1", 3).await;
    settle(&coordinator, &id).await;
    let calls_before = generator.calls().len();

    let first = coordinator.select_option(&id, 1, None).await;
    let second = coordinator.select_option(&id, 1, None).await;

    assert_eq!(first.outcome, SelectionOutcome::Cached);
    assert_eq!(second.outcome, SelectionOutcome::Cached);
    assert!(Arc::ptr_eq(&first.artifact, &second.artifact));
    assert_eq!(generator.calls().len(), calls_before);
}

#[tokio::test(start_paused = true)]
async fn test_selection_leaves_only_chosen_artifacts() {
    let generator = Arc::new(ScriptedGenerator::new(2));
    let coordinator = coordinator(&generator, &with_layer2(layer1_only_config()));

    let id = start(&coordinator, "s1", 4).await;
    settle(&coordinator, &id).await;
    assert_eq!(coordinator.cache().snapshot(&id).unwrap().layer2.len(), 4);

    coordinator.select_option(&id, 2, None).await;

    let snapshot = coordinator.cache().snapshot(&id).unwrap();
    assert_eq!(snapshot.layer1, BTreeSet::from([2]));
    assert_eq!(snapshot.layer2.keys().copied().collect::<Vec<_>>(), vec![2]);
    assert_eq!(snapshot.statuses[&0], OptionStatus::Pending);
    assert_eq!(snapshot.statuses[&2], OptionStatus::Completed);
    assert!(coordinator.fetch_layer2(&id, 0, 0).is_none());
    assert!(coordinator.fetch_layer2(&id, 2, 1).is_some());
}

#[tokio::test(start_paused = true)]
async fn test_always_failing_option_falls_back() {
    let generator = Arc::new(ScriptedGenerator::new(2).failing("opt 2"));
    let coordinator = coordinator(&generator, &layer1_only_config());

    let id = start(&coordinator, "s1", 4).await;
    let began = Instant::now();
    let selection = coordinator.select_option(&id, 2, None).await;

    assert_eq!(
        selection.outcome,
        SelectionOutcome::Fallback {
            reason: FallbackReason::Failed
        }
    );
    assert!(selection.is_fallback());
    assert!(!selection.timed_out());
    assert_eq!(*selection.artifact, Artifact::fallback("opt 2"));
    assert!(began.elapsed() < coordinator.scheduler().config().select_timeout());

    // two promotions, both failed
    assert_eq!(generator.call_count("opt 2"), 2);
    let stats = coordinator.stats();
    assert_eq!(stats.promotions, 2);
    assert_eq!(stats.fallbacks, 1);
    let snapshot = coordinator.cache().snapshot(&id).unwrap();
    assert_eq!(snapshot.statuses[&2], OptionStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_failed_option_can_be_selected_again() {
    let generator = Arc::new(ScriptedGenerator::new(1).failing("opt 0"));
    let mut config = layer1_only_config();
    config.scheduler.max_select_attempts = 1;
    let coordinator = coordinator(&generator, &config);

    let id = start(&coordinator, "s1", 1).await;
    let first = coordinator.select_option(&id, 0, None).await;
    assert!(first.is_fallback());
    let second = coordinator.select_option(&id, 0, None).await;
    assert!(second.is_fallback());
    assert_eq!(generator.call_count("opt 0"), 2);
}

#[tokio::test(start_paused = true)]
async fn test_wait_timeout_returns_fallback() {
    let generator = Arc::new(ScriptedGenerator::new(1).gated("opt 0"));
    let mut config = layer1_only_config();
    config.scheduler.select_timeout_ms = 200;
    let coordinator = coordinator(&generator, &config);

    let id = start(&coordinator, "s1", 2).await;
    let began = Instant::now();
    let selection = coordinator.select_option(&id, 0, None).await;

    assert!(selection.timed_out());
    assert_eq!(*selection.artifact, Artifact::fallback("opt 0"));
    let waited = began.elapsed();
    assert!(waited >= Duration::from_millis(200));
    assert!(waited < Duration::from_secs(1));
    assert_eq!(coordinator.stats().fallbacks, 1);

    // the late result still lands for the chosen option
    generator.release("opt 0");
    sleep(Duration::from_millis(100)).await;
    let late = coordinator.cache().layer1_artifact(&id, 0).unwrap();
    assert_eq!(late.scene, "Scene after opt 0");
    assert_eq!(generator.call_count("opt 0"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_previous_scene_is_removed() {
    let generator = Arc::new(ScriptedGenerator::new(2));
    let coordinator = coordinator(&generator, &layer1_only_config());

    let a = start(&coordinator, "A", 2).await;
    settle(&coordinator, &a).await;
    coordinator.select_option(&a, 0, None).await;

    let b = start(&coordinator, "B", 2).await;
    settle(&coordinator, &b).await;
    coordinator.select_option(&b, 1, Some(&a)).await;

    assert!(!coordinator.cache().contains(&a));
    assert!(coordinator.cache().contains(&b));
    assert_eq!(coordinator.cache().current(), Some(b));
}

#[tokio::test(start_paused = true)]
async fn test_previous_bootstrap_scene_is_kept() {
    let generator = Arc::new(ScriptedGenerator::new(2));
    let coordinator = coordinator(&generator, &layer1_only_config());

    let initial = start(&coordinator, "initial", 2).await;
    settle(&coordinator, &initial).await;
    coordinator.select_option(&initial, 0, None).await;

    let next = start(&coordinator, "next", 2).await;
    settle(&coordinator, &next).await;
    coordinator.select_option(&next, 0, Some(&initial)).await;
    // naming the scene itself as previous is a no-op
    coordinator.select_option(&next, 0, Some(&next)).await;

    assert!(coordinator.cache().contains(&initial));
    assert!(coordinator.cache().contains(&next));
}

#[tokio::test(start_paused = true)]
async fn test_unknown_scene_uses_bootstrap_artifact() {
    let generator = Arc::new(ScriptedGenerator::new(2));
    let coordinator = coordinator(&generator, &layer1_only_config());

    let initial = start(&coordinator, "initial", 3).await;
    settle(&coordinator, &initial).await;
    let expected = coordinator.cache().layer1_artifact(&initial, 1).unwrap();

    let selection = coordinator.select_option(&scene("gone"), 1, None).await;
    assert_eq!(selection.outcome, SelectionOutcome::Bootstrap);
    assert!(Arc::ptr_eq(&selection.artifact, &expected));
}

#[tokio::test(start_paused = true)]
async fn test_unknown_scene_without_bootstrap_falls_back() {
    let generator = Arc::new(ScriptedGenerator::new(2));
    let coordinator = coordinator(&generator, &layer1_only_config());

    let selection = coordinator.select_option(&scene("gone"), 1, None).await;
    assert_eq!(
        selection.outcome,
        SelectionOutcome::Fallback {
            reason: FallbackReason::Stale
        }
    );
    assert_eq!(*selection.artifact, Artifact::fallback("option 2"));
    assert!(generator.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_out_of_range_selection_changes_nothing() {
    let generator = Arc::new(ScriptedGenerator::new(2));
    let coordinator = coordinator(&generator, &layer1_only_config());

    let id = start(&coordinator, "s1", 2).await;
    settle(&coordinator, &id).await;
    let selection = coordinator.select_option(&id, 9, None).await;

    assert_eq!(
        selection.outcome,
        SelectionOutcome::Fallback {
            reason: FallbackReason::OutOfRange
        }
    );
    let snapshot = coordinator.cache().snapshot(&id).unwrap();
    assert_eq!(snapshot.layer1, BTreeSet::from([0, 1]));
    assert!(!snapshot.should_cancel_siblings);
}

#[tokio::test(start_paused = true)]
async fn test_largest_index_falls_back_without_overflow() {
    let generator = Arc::new(ScriptedGenerator::new(2));
    let coordinator = coordinator(&generator, &layer1_only_config());

    let id = start(&coordinator, "s1", 2).await;
    settle(&coordinator, &id).await;
    let selection = coordinator.select_option(&id, usize::MAX, None).await;

    assert_eq!(
        selection.outcome,
        SelectionOutcome::Fallback {
            reason: FallbackReason::OutOfRange
        }
    );
    let label = format!("option {}", usize::MAX);
    assert_eq!(*selection.artifact, Artifact::fallback(&label));
    assert_eq!(coordinator.stats().fallbacks, 1);
}

#[tokio::test(start_paused = true)]
async fn test_fetch_layer2_never_generates() {
    let generator = Arc::new(ScriptedGenerator::new(2));
    let coordinator = coordinator(&generator, &layer1_only_config());

    let id = start(&coordinator, "s1", 2).await;
    settle(&coordinator, &id).await;
    let calls = generator.calls().len();

    assert!(coordinator.fetch_layer2(&id, 0, 0).is_none());
    assert!(coordinator.fetch_layer2(&scene("gone"), 0, 0).is_none());
    assert_eq!(generator.calls().len(), calls);
}
