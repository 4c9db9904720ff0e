//! Scene id derivation is a pure function of state and options

use prescient::{GameState, SceneId};
use proptest::prelude::*;
use serde_json::json;

fn state_strategy() -> impl Strategy<Value = GameState> {
    ("[a-z]{1,8}", any::<i64>(), any::<bool>()).prop_map(|(hero, gold, flag)| {
        GameState::new(json!({ "hero": hero, "gold": gold, "world": { "flag": flag } }))
    })
}

fn options_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[A-Za-z ]{1,16}", 0..6)
}

#[test]
fn test_scene_id_derivation_is_deterministic() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(&(state_strategy(), options_strategy()), |(state, options)| {
            let first = SceneId::derive(&state, &options);
            let second = SceneId::derive(&state.clone(), &options.clone());
            assert_eq!(first, second);
            assert_eq!(first.as_str().len(), 24);
            assert!(first.as_str().chars().all(|c| c.is_ascii_hexdigit()));
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_scene_id_depends_on_options() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(
            &(state_strategy(), options_strategy(), options_strategy()),
            |(state, a, b)| {
                prop_assume!(a != b);
                assert_ne!(SceneId::derive(&state, &a), SceneId::derive(&state, &b));
                Ok(())
            },
        )
        .unwrap();
}

#[test]
fn test_option_boundaries_are_part_of_the_id() {
    let state = GameState::default();
    let joined = SceneId::derive(&state, &["ab".to_string()]);
    let split = SceneId::derive(&state, &["a".to_string(), "b".to_string()]);
    assert_ne!(joined, split);
}
