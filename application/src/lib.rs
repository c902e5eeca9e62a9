//! Application layer for civicmind
//!
//! This crate contains use cases, port definitions, and application configuration.
//! It depends only on the domain layer.

pub mod config;
pub mod error;
pub mod ports;
pub mod use_cases;

// Re-export commonly used types
pub use config::OrchestrationParams;
pub use error::OrchestrationError;
pub use ports::{
    clock::{Clock, ManualClock, SystemClock},
    domain_handler::{DomainHandler, HandlerError},
    event_logger::{EventLogger, NoEventLogger, OrchestrationEvent},
    progress::{NoWorkflowProgress, WorkflowProgressNotifier},
    workflow_store::{InMemoryWorkflowStore, Lease, StoreError, WorkflowStore},
};
pub use use_cases::domain_registry::DomainRegistry;
pub use use_cases::health_monitor::{
    AdmissionPermit, DomainHealth, HealthMonitor, HealthSummary, ProbeOutcome, RegistryOverview,
};
pub use use_cases::router::{RouteError, RoutedResponse, Router, Selection};
pub use use_cases::submit_issue::{SubmitIssueInput, SubmitIssueUseCase};
pub use use_cases::workflow_engine::{RecoveryOutcome, WorkflowEngine, WorkflowError};
