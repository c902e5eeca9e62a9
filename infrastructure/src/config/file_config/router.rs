//! Router configuration from TOML (`[router]` section)

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileRouterConfig {
    /// Timeout of a single handler dispatch
    pub dispatch_timeout_secs: u64,
}

impl Default for FileRouterConfig {
    fn default() -> Self {
        Self {
            dispatch_timeout_secs: 30,
        }
    }
}
