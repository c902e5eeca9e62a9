//! Types for the workflow engine

use crate::ports::workflow_store::StoreError;
use chrono::{DateTime, Utc};
use civic_domain::{DomainId, InstanceId, StepId, WorkflowDefinitionError, WorkflowStatus};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Errors surfaced by the workflow control surface
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkflowError {
    #[error("Unknown workflow type: {0}")]
    UnknownWorkflowType(String),

    #[error("Invalid workflow definition: {0}")]
    InvalidDefinition(#[from] WorkflowDefinitionError),

    #[error("Workflow instance not found: {0}")]
    NotFound(InstanceId),

    #[error("Instance {instance_id} is being driven by {owner} (lease until {expires_at})")]
    LeaseUnavailable {
        instance_id: InstanceId,
        owner: String,
        expires_at: DateTime<Utc>,
    },

    #[error("Workflow store error: {0}")]
    Store(StoreError),

    #[error("Instance {instance_id} is already {status}")]
    AlreadyTerminal {
        instance_id: InstanceId,
        status: WorkflowStatus,
    },
}

impl From<StoreError> for WorkflowError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound(id) => WorkflowError::NotFound(id),
            StoreError::LeaseHeld {
                instance_id,
                owner,
                expires_at,
            } => WorkflowError::LeaseUnavailable {
                instance_id,
                owner,
                expires_at,
            },
            other => WorkflowError::Store(other),
        }
    }
}

/// Result of resuming one instance during recovery.
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryOutcome {
    pub instance_id: InstanceId,
    pub workflow_type: String,
    /// Terminal (or current) status after the resume, if it could be driven
    pub status: Option<WorkflowStatus>,
    pub error: Option<String>,
}

/// How a step picks its handler for one attempt.
#[derive(Debug, Clone)]
pub(super) enum StepRoute {
    Fixed(DomainId),
    Classify(String),
}

/// Everything a step task needs; prepared under the instance update so the
/// task itself never reads instance state.
#[derive(Debug, Clone)]
pub(super) struct StepDispatch {
    pub step_id: StepId,
    pub attempt: u32,
    pub route: StepRoute,
    pub payload: Value,
}

#[derive(Debug, Clone)]
pub(super) enum StepOutcome {
    Succeeded { domain: DomainId, payload: Value },
    Failed { error: String, retryable: bool },
}

/// A compensation ready to be sent.
#[derive(Debug, Clone)]
pub(super) struct CompensationCall {
    pub step_id: StepId,
    pub domain: Option<DomainId>,
    pub attempt: u32,
    pub payload: Value,
}

#[derive(Debug, Clone)]
pub(super) enum CompensationPlan {
    Run(CompensationCall),
    /// Nothing to run right now; the driver waits for a wakeup
    Idle,
}
