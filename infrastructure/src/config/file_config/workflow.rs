//! Workflow engine configuration from TOML (`[workflow]` section)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileWorkflowConfig {
    /// Global bound on concurrently running steps
    pub max_in_flight_steps: usize,
    pub lease_ttl_secs: u64,
    /// Where workflow instances are persisted
    pub state_dir: Option<PathBuf>,
}

impl Default for FileWorkflowConfig {
    fn default() -> Self {
        Self {
            max_in_flight_steps: 8,
            lease_ttl_secs: 60,
            state_dir: None,
        }
    }
}

impl FileWorkflowConfig {
    /// Configured state directory, else `<data dir>/civicmind/workflows`,
    /// else `./.civicmind/workflows`.
    pub fn resolved_state_dir(&self) -> PathBuf {
        if let Some(dir) = &self.state_dir {
            return dir.clone();
        }
        dirs::data_local_dir()
            .map(|d| d.join("civicmind"))
            .unwrap_or_else(|| PathBuf::from(".civicmind"))
            .join("workflows")
    }
}
