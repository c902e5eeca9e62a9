//! Raw TOML configuration data types
//!
//! These structs represent the exact structure of the TOML config file.
//! They are deserialized directly and use domain types where appropriate.

mod classifier;
mod health;
mod logging;
mod output;
mod router;
mod workflow;

pub use classifier::FileClassifierConfig;
pub use health::FileHealthConfig;
pub use logging::FileLoggingConfig;
pub use output::{FileOutputConfig, FileOutputFormat};
pub use router::FileRouterConfig;
pub use workflow::FileWorkflowConfig;

use crate::catalogue;
use civic_application::OrchestrationParams;
use civic_domain::{DomainDescriptor, RetryPolicy, WorkflowDefinition};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigValidationError {
    #[error("{0} cannot be 0")]
    Zero(&'static str),

    #[error("classifier.min_score must be within [0, 1], got {0}")]
    MinScoreOutOfRange(f64),

    #[error("classifier.general_domain cannot be empty")]
    EmptyGeneralDomain,

    #[error("domain id cannot be empty (domains[{0}])")]
    EmptyDomainId(usize),

    #[error("configured domains do not include the general domain '{0}'")]
    MissingGeneralDomain(String),
}

/// Complete file configuration (raw TOML structure)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub classifier: FileClassifierConfig,
    /// Circuit breaker and probe settings
    pub health: FileHealthConfig,
    pub router: FileRouterConfig,
    /// Shared by router, step and compensation retries
    pub retry: RetryPolicy,
    pub workflow: FileWorkflowConfig,
    pub logging: FileLoggingConfig,
    pub output: FileOutputConfig,
    /// Domain catalogue; the built-in catalogue is used when empty
    pub domains: Vec<DomainDescriptor>,
    /// Workflow definitions; the built-in ones are used when empty
    pub workflows: Vec<WorkflowDefinition>,
}

impl FileConfig {
    /// Validate the entire configuration, returning all detected issues.
    pub fn validate(&self) -> Vec<ConfigValidationError> {
        let mut issues = Vec::new();

        let zero_checks: [(&'static str, u64); 7] = [
            ("health.failure_threshold", self.health.failure_threshold as u64),
            ("health.cooldown_secs", self.health.cooldown_secs),
            ("health.probe_interval_secs", self.health.probe_interval_secs),
            ("health.probe_timeout_secs", self.health.probe_timeout_secs),
            ("router.dispatch_timeout_secs", self.router.dispatch_timeout_secs),
            ("retry.max_attempts", self.retry.max_attempts as u64),
            ("workflow.lease_ttl_secs", self.workflow.lease_ttl_secs),
        ];
        for (field, value) in zero_checks {
            if value == 0 {
                issues.push(ConfigValidationError::Zero(field));
            }
        }
        if self.workflow.max_in_flight_steps == 0 {
            issues.push(ConfigValidationError::Zero("workflow.max_in_flight_steps"));
        }

        if !(0.0..=1.0).contains(&self.classifier.min_score) {
            issues.push(ConfigValidationError::MinScoreOutOfRange(
                self.classifier.min_score,
            ));
        }
        let general = self.classifier.general_domain.trim();
        if general.is_empty() {
            issues.push(ConfigValidationError::EmptyGeneralDomain);
        }

        for (i, domain) in self.domains.iter().enumerate() {
            if domain.id.as_str().trim().is_empty() {
                issues.push(ConfigValidationError::EmptyDomainId(i));
            }
        }
        if !self.domains.is_empty()
            && !general.is_empty()
            && !self.domains.iter().any(|d| d.id.as_str() == general)
        {
            issues.push(ConfigValidationError::MissingGeneralDomain(general.to_string()));
        }

        issues
    }

    /// Runtime parameters for the orchestration services.
    pub fn to_params(&self) -> OrchestrationParams {
        OrchestrationParams {
            classifier: self.classifier.to_classifier_config(),
            circuit: self.health.to_policy(),
            probe_interval: Duration::from_secs(self.health.probe_interval_secs),
            probe_timeout: Duration::from_secs(self.health.probe_timeout_secs),
            dispatch_timeout: Duration::from_secs(self.router.dispatch_timeout_secs),
            retry: self.retry,
            max_in_flight_steps: self.workflow.max_in_flight_steps.max(1),
            lease_ttl: Duration::from_secs(self.workflow.lease_ttl_secs),
        }
    }

    /// Configured domains, or the built-in catalogue.
    pub fn domain_catalogue(&self) -> Vec<DomainDescriptor> {
        if self.domains.is_empty() {
            catalogue::builtin_domains()
        } else {
            self.domains.clone()
        }
    }

    /// Configured workflow definitions, or the built-in ones.
    pub fn workflow_catalogue(&self) -> Vec<WorkflowDefinition> {
        if self.workflows.is_empty() {
            catalogue::builtin_workflows()
        } else {
            self.workflows.clone()
        }
    }
}
