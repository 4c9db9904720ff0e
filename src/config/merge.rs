//! Merge rules: built-in defaults applied beneath every other source.

use super::{
    default_bootstrap_scene, default_capacity, default_evict_join_timeout_ms,
    default_layer2_join_timeout_ms, default_max_select_attempts, default_remove_join_timeout_ms,
    default_select_timeout_ms,
};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError};

/// Create a Config builder with merge policy defaults applied.
pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Config::builder()
        .set_default("cache.capacity", default_capacity() as i64)?
        .set_default("cache.bootstrap_scene", default_bootstrap_scene())?
        .set_default(
            "cache.evict_join_timeout_ms",
            default_evict_join_timeout_ms() as i64,
        )?
        .set_default(
            "cache.remove_join_timeout_ms",
            default_remove_join_timeout_ms() as i64,
        )?
        .set_default(
            "scheduler.select_timeout_ms",
            default_select_timeout_ms() as i64,
        )?
        .set_default(
            "scheduler.layer2_join_timeout_ms",
            default_layer2_join_timeout_ms() as i64,
        )?
        .set_default(
            "scheduler.max_select_attempts",
            default_max_select_attempts() as i64,
        )?
        .set_default("scheduler.layer2_enabled", true)
}
