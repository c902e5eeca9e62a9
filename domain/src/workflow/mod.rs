//! Multi-step workflows
//!
//! Definitions (the declarative DAG), start-time validation, input
//! templating and the per-instance state machine. Execution lives in the
//! application layer's workflow engine.

pub mod definition;
pub mod instance;
pub mod template;
pub mod validation;
pub mod value_objects;

pub use definition::{CompensationSpec, StepSpec, StepTarget, WorkflowDefinition};
pub use instance::{
    AttemptOutcome, CompensationFailure, CompensationStep, FailureReport, StepState, StepStatus,
    StepTransitionError, WorkflowInstance, WorkflowStatus,
};
pub use template::{TemplateContext, TemplateError};
pub use validation::WorkflowDefinitionError;
pub use value_objects::{InstanceId, StepId};
