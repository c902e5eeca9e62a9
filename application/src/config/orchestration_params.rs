//! Orchestration parameters: runtime knobs for the services.
//!
//! [`OrchestrationParams`] groups the tunables that the registry, health
//! monitor, router and workflow engine read at construction time. The
//! infrastructure layer builds it from the merged configuration file.

use civic_domain::{CircuitBreakerPolicy, ClassifierConfig, RetryPolicy};
use std::time::Duration;

/// Runtime parameters for the orchestration services.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestrationParams {
    pub classifier: ClassifierConfig,
    /// Per-domain circuit breaker
    pub circuit: CircuitBreakerPolicy,
    /// Interval of the active probe loop
    pub probe_interval: Duration,
    /// Timeout of a single health probe
    pub probe_timeout: Duration,
    /// Timeout of a single handler dispatch
    pub dispatch_timeout: Duration,
    /// Shared by router retries, step retries and compensation retries
    pub retry: RetryPolicy,
    /// Global bound on concurrently running workflow steps
    pub max_in_flight_steps: usize,
    pub lease_ttl: Duration,
}

impl Default for OrchestrationParams {
    fn default() -> Self {
        Self {
            classifier: ClassifierConfig::default(),
            circuit: CircuitBreakerPolicy::default(),
            probe_interval: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(5),
            dispatch_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            max_in_flight_steps: 8,
            lease_ttl: Duration::from_secs(60),
        }
    }
}

impl OrchestrationParams {
    // ==================== Builder Methods ====================

    pub fn with_circuit(mut self, circuit: CircuitBreakerPolicy) -> Self {
        self.circuit = circuit;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_dispatch_timeout(mut self, timeout: Duration) -> Self {
        self.dispatch_timeout = timeout;
        self
    }

    pub fn with_max_in_flight_steps(mut self, max: usize) -> Self {
        self.max_in_flight_steps = max.max(1);
        self
    }

    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    /// How often a driver renews its lease.
    pub fn lease_renewal_interval(&self) -> Duration {
        (self.lease_ttl / 3).max(Duration::from_millis(10))
    }
}
