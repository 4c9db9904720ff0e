//! Config loading facade: assembles sources in precedence order.

use super::{merge, sources, PrescientConfig};
use config::{ConfigError, File};
use std::path::Path;

/// Loads [`PrescientConfig`] from defaults, files and environment.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load with full precedence: defaults < global file < workspace files < env.
    pub fn load(workspace_root: &Path) -> Result<PrescientConfig, ConfigError> {
        let builder = merge::builder_with_defaults()?;
        let builder = sources::global_file::add_to_builder(builder)?;
        let builder = sources::workspace_file::add_to_builder(builder, workspace_root)?;
        builder
            .add_source(sources::environment())
            .build()?
            .try_deserialize()
    }

    /// Load a single explicit file over the defaults.
    pub fn load_from_file(path: &Path) -> Result<PrescientConfig, ConfigError> {
        merge::builder_with_defaults()?
            .add_source(File::from(path).required(true))
            .build()?
            .try_deserialize()
    }
}
