//! Integration tests for configuration loading and the CLI run context

use crate::integration::test_utils::*;
use prescient::cli::{run_simulation, Commands, RunContext, SimulateArgs};
use prescient::config::ConfigLoader;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

#[tokio::test(start_paused = true)]
async fn test_file_config_drives_cache_capacity() {
    let temp_dir = TempDir::new().unwrap();
    let config_file = temp_dir.path().join("prescient.toml");
    std::fs::write(
        &config_file,
        r#"
[cache]
capacity = 2
bootstrap_scene = "prologue"

[scheduler]
layer2_enabled = false
"#,
    )
    .unwrap();

    let config = ConfigLoader::load_from_file(&config_file).unwrap();
    assert!(config.validate().is_ok());
    assert_eq!(config.cache.capacity, 2);
    // untouched keys keep their defaults
    assert_eq!(config.scheduler.max_select_attempts, 2);

    let generator = Arc::new(ScriptedGenerator::new(1));
    let coordinator = coordinator(&generator, &config);
    assert_eq!(coordinator.cache().bootstrap(), &scene("prologue"));

    for id in ["A", "B", "C"] {
        start(&coordinator, id, 1).await;
    }
    assert_eq!(coordinator.cache().len(), 2);
    assert!(!coordinator.cache().contains(&scene("A")));
}

#[test]
fn test_invalid_values_fail_validation() {
    let temp_dir = TempDir::new().unwrap();
    let config_file = temp_dir.path().join("prescient.toml");
    std::fs::write(
        &config_file,
        "[cache]\ncapacity = 0\n\n[scheduler]\nmax_select_attempts = 0\n",
    )
    .unwrap();

    let config = ConfigLoader::load_from_file(&config_file).unwrap();
    let errors = config.validate().unwrap_err();
    assert_eq!(errors.len(), 2);

    let err = RunContext::new(temp_dir.path().to_path_buf(), Some(config_file)).unwrap_err();
    assert!(err.to_string().contains("capacity must be at least 1"));
}

#[test]
fn test_missing_config_file_is_an_error() {
    let temp_dir = TempDir::new().unwrap();
    let missing = temp_dir.path().join("absent.toml");
    assert!(RunContext::new(temp_dir.path().to_path_buf(), Some(missing)).is_err());
}

#[test]
fn test_show_config_renders_effective_values() {
    let temp_dir = TempDir::new().unwrap();
    let config_file = temp_dir.path().join("prescient.toml");
    std::fs::write(&config_file, "[cache]\ncapacity = 9\n").unwrap();

    let context = RunContext::new(temp_dir.path().to_path_buf(), Some(config_file)).unwrap();
    let output = context
        .execute(&Commands::ShowConfig {
            format: "json".to_string(),
        })
        .unwrap();
    let value: serde_json::Value = serde_json::from_str(&output).unwrap();
    assert_eq!(value["cache"]["capacity"], 9);
    assert_eq!(value["cache"]["bootstrap_scene"], "initial");

    let err = context
        .execute(&Commands::ShowConfig {
            format: "yaml".to_string(),
        })
        .unwrap_err();
    assert!(err.to_string().contains("Unknown format"));
}

#[test]
fn test_simulate_rejects_unknown_format() {
    let temp_dir = TempDir::new().unwrap();
    let context = RunContext::new(temp_dir.path().to_path_buf(), None).unwrap();

    let err = context
        .execute(&Commands::Simulate {
            options: 2,
            latency_ms: 1,
            think_ms: 1,
            rounds: 1,
            choose: None,
            fail_every: None,
            format: "yaml".to_string(),
        })
        .unwrap_err();
    assert!(err.to_string().contains("Unknown format: yaml"));
}

#[test]
fn test_workspace_config_file_is_picked_up() {
    let temp_dir = TempDir::new().unwrap();
    let config_dir = temp_dir.path().join("config");
    std::fs::create_dir_all(&config_dir).unwrap();
    std::fs::write(
        config_dir.join("config.toml"),
        "[scheduler]\nselect_timeout_ms = 1234\n",
    )
    .unwrap();

    let config = ConfigLoader::load(temp_dir.path()).unwrap();
    assert_eq!(config.scheduler.select_timeout_ms, 1234);
}

#[tokio::test(start_paused = true)]
async fn test_simulation_plays_requested_rounds() {
    let config = with_layer2(layer1_only_config());
    let args = SimulateArgs {
        options: 3,
        latency: Duration::from_millis(50),
        think: Duration::from_millis(200),
        rounds: 3,
        choose: None,
        fail_every: None,
    };

    let report = run_simulation(&config, &args).await;

    assert_eq!(report.rounds.len(), 3);
    assert_eq!(report.rounds[0].choice, "Take path 1");
    assert_eq!(report.rounds[1].choice, "Take path 1 / path 2");
    assert!(report.generator_calls >= 3);
    assert!(report.cached_scenes <= config.cache.capacity);
    assert_eq!(report.stats.fallbacks, 0);
}
