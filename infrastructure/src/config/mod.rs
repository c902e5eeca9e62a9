//! Configuration file loading for civicmind
//!
//! This module handles file I/O and merging of configuration from multiple sources.
//! The priority order (highest to lowest):
//!
//! 1. Environment: `CIVICMIND_<SECTION>__<KEY>`
//! 2. `--config <path>` specified file
//! 3. Project root: `./civicmind.toml` or `./.civicmind.toml`
//! 4. Global: `$XDG_CONFIG_HOME/civicmind/config.toml` (or platform equivalent)
//! 5. Default values

mod file_config;
mod loader;

pub use file_config::{
    ConfigValidationError, FileClassifierConfig, FileConfig, FileHealthConfig, FileLoggingConfig,
    FileOutputConfig, FileOutputFormat, FileRouterConfig, FileWorkflowConfig,
};
pub use loader::ConfigLoader;
