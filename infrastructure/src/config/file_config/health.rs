//! Health monitor configuration from TOML (`[health]` section)

use civic_domain::CircuitBreakerPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileHealthConfig {
    /// Consecutive failures that open a domain's circuit
    pub failure_threshold: u32,
    pub cooldown_secs: u64,
    /// Upper bound for the cooldown after repeated failed trials
    pub max_cooldown_secs: u64,
    pub probe_interval_secs: u64,
    pub probe_timeout_secs: u64,
}

impl Default for FileHealthConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_secs: 30,
            max_cooldown_secs: 300,
            probe_interval_secs: 10,
            probe_timeout_secs: 5,
        }
    }
}

impl FileHealthConfig {
    pub fn to_policy(&self) -> CircuitBreakerPolicy {
        let cooldown = Duration::from_secs(self.cooldown_secs);
        CircuitBreakerPolicy {
            failure_threshold: self.failure_threshold,
            cooldown,
            max_cooldown: Duration::from_secs(self.max_cooldown_secs).max(cooldown),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_policy_defaults() {
        assert_eq!(FileHealthConfig::default().to_policy(), CircuitBreakerPolicy::default());
    }

    #[test]
    fn test_max_cooldown_never_below_cooldown() {
        let config = FileHealthConfig {
            cooldown_secs: 60,
            max_cooldown_secs: 10,
            ..Default::default()
        };
        assert_eq!(config.to_policy().max_cooldown, Duration::from_secs(60));
    }
}
