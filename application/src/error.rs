//! Orchestration error taxonomy
//!
//! Every layer keeps its own error enum; [`OrchestrationError`] is the
//! single vocabulary surfaced to callers of the submission and workflow
//! boundaries.

use crate::ports::domain_handler::HandlerError;
use crate::use_cases::router::RouteError;
use crate::use_cases::workflow_engine::WorkflowError;
use civic_domain::{
    DomainError, DomainId, FailureReport, InstanceId, StepId, WorkflowInstance, WorkflowStatus,
};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum OrchestrationError {
    /// Informational: the request was sent to the general domain.
    #[error("No domain matched the issue; handled by the general domain")]
    ClassificationEmpty,

    #[error("Handler for '{domain}' timed out after {}s", .timeout.as_secs_f64())]
    HandlerTimeout { domain: DomainId, timeout: Duration },

    #[error("Handler for '{domain}' failed: {message}")]
    HandlerError { domain: DomainId, message: String },

    #[error("All handlers unavailable ({} tried); retry later", .tried.len())]
    AllHandlersUnavailable { tried: Vec<DomainId> },

    #[error("Workflow {instance_id} failed at step {}: {}", step_label(.report), .report.reason)]
    WorkflowStepFailed {
        instance_id: InstanceId,
        report: FailureReport,
    },

    #[error(
        "Workflow {instance_id} compensation incomplete: {} step(s) could not be undone",
        .report.compensation_failures.len()
    )]
    CompensationFailed {
        instance_id: InstanceId,
        report: FailureReport,
    },

    #[error("Domain already registered: {0}")]
    DuplicateDomain(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    Invalid(String),

    #[error("Workflow store unavailable: {0}")]
    Store(String),
}

fn step_label(report: &FailureReport) -> &str {
    report
        .failed_step
        .as_ref()
        .map(StepId::as_str)
        .unwrap_or("(cancelled)")
}

impl OrchestrationError {
    /// The caller may retry later; nothing was wrong with the request itself.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            OrchestrationError::HandlerTimeout { .. }
                | OrchestrationError::HandlerError { .. }
                | OrchestrationError::AllHandlersUnavailable { .. }
                | OrchestrationError::Store(_)
        )
    }

    /// Classify a terminal instance. `None` for success and for a clean
    /// cancellation.
    pub fn from_instance(instance: &WorkflowInstance) -> Option<Self> {
        let report = instance.failure_report.clone().unwrap_or_default();
        match instance.status {
            WorkflowStatus::Compensated | WorkflowStatus::Failed if report.is_partial() => {
                Some(OrchestrationError::CompensationFailed {
                    instance_id: instance.instance_id.clone(),
                    report,
                })
            }
            WorkflowStatus::Compensated if report.cancelled => None,
            WorkflowStatus::Compensated | WorkflowStatus::Failed => {
                Some(OrchestrationError::WorkflowStepFailed {
                    instance_id: instance.instance_id.clone(),
                    report,
                })
            }
            _ => None,
        }
    }
}

impl From<HandlerError> for OrchestrationError {
    fn from(error: HandlerError) -> Self {
        // Callers that know the domain go through RouteError instead
        Self::from(RouteError::Handler {
            domain: DomainId::new("unknown"),
            error,
        })
    }
}

impl From<RouteError> for OrchestrationError {
    fn from(error: RouteError) -> Self {
        match error {
            RouteError::AllHandlersUnavailable { tried } => {
                OrchestrationError::AllHandlersUnavailable { tried }
            }
            RouteError::Handler {
                domain,
                error: HandlerError::Timeout(timeout),
            } => OrchestrationError::HandlerTimeout { domain, timeout },
            RouteError::Handler { domain, error } => OrchestrationError::HandlerError {
                domain,
                message: error.to_string(),
            },
            RouteError::UnknownDomain(id) => OrchestrationError::NotFound(format!("domain {}", id)),
        }
    }
}

impl From<DomainError> for OrchestrationError {
    fn from(error: DomainError) -> Self {
        match error {
            DomainError::DuplicateDomain(id) => OrchestrationError::DuplicateDomain(id),
            DomainError::NotFound(id) => OrchestrationError::NotFound(format!("domain {}", id)),
            other => OrchestrationError::Invalid(other.to_string()),
        }
    }
}

impl From<WorkflowError> for OrchestrationError {
    fn from(error: WorkflowError) -> Self {
        match error {
            WorkflowError::NotFound(id) => OrchestrationError::NotFound(format!("workflow instance {}", id)),
            WorkflowError::UnknownWorkflowType(t) => {
                OrchestrationError::NotFound(format!("workflow type {}", t))
            }
            WorkflowError::Store(e) => OrchestrationError::Store(e.to_string()),
            other => OrchestrationError::Invalid(other.to_string()),
        }
    }
}
