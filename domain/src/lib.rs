//! Domain layer for civicmind
//!
//! This crate contains the core orchestration logic as plain types and pure
//! functions. It has no dependencies on I/O, async runtimes, or presentation
//! concerns.
//!
//! # Core Concepts
//!
//! ## Registry
//!
//! A civic service **domain** (parking, permits, noise...) is described by a
//! [`DomainDescriptor`]: its signature, handler endpoint and fallbacks. The
//! registry hands out immutable [`RegistrySnapshot`]s.
//!
//! ## Classification
//!
//! The [`Classifier`] ranks domains for a piece of issue text through a
//! pluggable [`SignatureScorer`], falling back to the `general` domain.
//!
//! ## Health
//!
//! [`HealthRecord`] is the per-domain circuit breaker
//! (Closed / Open / HalfOpen).
//!
//! ## Workflows
//!
//! A [`WorkflowDefinition`] is a DAG of steps; a [`WorkflowInstance`] is the
//! persisted state of one run, including saga-style compensation.

pub mod classification;
pub mod config;
pub mod core;
pub mod health;
pub mod registry;
pub mod retry;
pub mod workflow;

// Re-export commonly used types
pub use classification::{
    ClassificationResult, Classifier, ClassifierConfig, DefaultScorer, DomainScore,
    EmbeddingScorer, HashingEmbedder, KeywordScorer, SignatureScorer, TextEmbedder,
};
pub use config::OutputFormat;
pub use core::{
    error::DomainError,
    issue::{IssueReport, Priority},
};
pub use health::{
    Admission, CircuitBreakerPolicy, CircuitState, HealthRecord, HealthTransition,
    TransitionReason,
};
pub use registry::{
    descriptor::{DomainDescriptor, DomainId, Endpoint, ResolutionPath},
    signature::{Signature, WeightedKeyword},
    snapshot::RegistrySnapshot,
};
pub use retry::RetryPolicy;
pub use workflow::{
    AttemptOutcome, CompensationFailure, CompensationSpec, CompensationStep, FailureReport,
    InstanceId, StepId, StepSpec, StepState, StepStatus, StepTarget, StepTransitionError,
    TemplateContext, TemplateError, WorkflowDefinition, WorkflowDefinitionError,
    WorkflowInstance, WorkflowStatus,
};
