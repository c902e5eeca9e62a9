//! Declarative workflow definitions
//!
//! A definition is a DAG of steps. Each step targets either a fixed domain or
//! asks the classifier to pick one from rendered text, declares the steps it
//! depends on, and may carry a compensation action to undo it.
//!
//! Definitions are plain data so they can live in `civicmind.toml`:
//!
//! ```toml
//! [[workflows]]
//! workflow_type = "open_restaurant"
//!
//! [[workflows.steps]]
//! id = "business_license"
//! domain = "business"
//! input = { request = "{{input.business_name}}" }
//! compensation = { action = "withdraw_application" }
//!
//! [[workflows.steps]]
//! id = "zoning_review"
//! domain = "permits"
//! depends_on = ["business_license"]
//! ```

use super::value_objects::StepId;
use crate::registry::descriptor::DomainId;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How a step picks the domain it is sent to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepTarget {
    /// Route to this domain (its fallbacks still apply)
    Domain { domain: DomainId },
    /// Render this text template, classify it, and route by the ranking
    Classify { classify: String },
}

/// Undo action for a succeeded step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensationSpec {
    /// Defaults to the domain that executed the step
    #[serde(default)]
    pub domain: Option<DomainId>,
    pub action: String,
    #[serde(default)]
    pub payload: Value,
}

impl CompensationSpec {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            domain: None,
            action: action.into(),
            payload: Value::Null,
        }
    }

    pub fn on_domain(mut self, domain: impl Into<DomainId>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    pub id: StepId,
    #[serde(flatten)]
    pub target: StepTarget,
    /// Input template; `null` forwards the workflow input unchanged
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub depends_on: Vec<StepId>,
    #[serde(default)]
    pub compensation: Option<CompensationSpec>,
    /// A failed optional step skips its dependents instead of failing the workflow
    #[serde(default)]
    pub optional: bool,
    /// Overrides the engine-wide retry policy
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
}

impl StepSpec {
    pub fn to_domain(id: impl Into<StepId>, domain: impl Into<DomainId>) -> Self {
        Self::with_target(
            id,
            StepTarget::Domain {
                domain: domain.into(),
            },
        )
    }

    pub fn classified(id: impl Into<StepId>, text_template: impl Into<String>) -> Self {
        Self::with_target(
            id,
            StepTarget::Classify {
                classify: text_template.into(),
            },
        )
    }

    fn with_target(id: impl Into<StepId>, target: StepTarget) -> Self {
        Self {
            id: id.into(),
            target,
            input: Value::Null,
            depends_on: Vec::new(),
            compensation: None,
            optional: false,
            retry: None,
        }
    }

    pub fn after<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<StepId>,
    {
        self.depends_on = dependencies.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }

    pub fn with_compensation(mut self, compensation: CompensationSpec) -> Self {
        self.compensation = Some(compensation);
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// The fixed domain of this step, if it has one.
    pub fn fixed_domain(&self) -> Option<&DomainId> {
        match &self.target {
            StepTarget::Domain { domain } => Some(domain),
            StepTarget::Classify { .. } => None,
        }
    }

    pub fn retry_policy(&self, default: &RetryPolicy) -> RetryPolicy {
        self.retry.unwrap_or(*default)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub workflow_type: String,
    #[serde(default)]
    pub description: String,
    pub steps: Vec<StepSpec>,
}

impl WorkflowDefinition {
    pub fn new(workflow_type: impl Into<String>, steps: Vec<StepSpec>) -> Self {
        Self {
            workflow_type: workflow_type.into(),
            description: String::new(),
            steps,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn step(&self, id: &StepId) -> Option<&StepSpec> {
        self.steps.iter().find(|s| &s.id == id)
    }

    /// Steps that list `id` as a direct dependency.
    pub fn dependents_of<'a>(&'a self, id: &'a StepId) -> impl Iterator<Item = &'a StepSpec> {
        self.steps.iter().filter(move |s| s.depends_on.contains(id))
    }
}
