//! Configuration sources, lowest precedence first.

pub mod global_file;
pub mod workspace_file;

use config::Environment;

/// Environment overrides: `PRESCIENT__CACHE__CAPACITY=5` sets `cache.capacity`.
pub fn environment() -> Environment {
    Environment::with_prefix("PRESCIENT")
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}
