//! Logging configuration from TOML (`[logging]` section)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileLoggingConfig {
    /// JSONL event log of every state transition; disabled when unset
    pub event_log: Option<PathBuf>,
    /// Directory for daily rolling diagnostic logs; stderr only when unset
    pub log_dir: Option<PathBuf>,
}
