//! Start-time validation of workflow definitions
//!
//! Structural problems (cycles, dangling references, unknown domains) are
//! rejected before an instance is created, never discovered mid-run.

use super::definition::{StepSpec, StepTarget, WorkflowDefinition};
use super::template::{self, Reference, TemplateError};
use super::value_objects::StepId;
use crate::registry::descriptor::DomainId;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkflowDefinitionError {
    #[error("workflow type cannot be empty")]
    MissingType,

    #[error("workflow {0} has no steps")]
    Empty(String),

    #[error("duplicate step id: {0}")]
    DuplicateStep(StepId),

    #[error("step {step} depends on unknown step {dependency}")]
    UnknownDependency { step: StepId, dependency: StepId },

    #[error("step {step} references unknown domain {domain}")]
    UnknownDomain { step: StepId, domain: DomainId },

    #[error("dependency cycle: {}", format_cycle(.path))]
    Cycle { path: Vec<StepId> },

    #[error("step {step} has an invalid template: {reason}")]
    InvalidTemplate { step: StepId, reason: String },

    #[error("step {step} reads the result of {referenced}, which it does not depend on")]
    UndeclaredResultReference { step: StepId, referenced: String },
}

fn format_cycle(path: &[StepId]) -> String {
    path.iter()
        .map(StepId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

impl WorkflowDefinition {
    /// Validate the definition and return its steps in topological order
    /// (ties broken by definition order).
    ///
    /// `domain_known` decides whether a fixed or compensation domain exists.
    pub fn validate(
        &self,
        domain_known: impl Fn(&DomainId) -> bool,
    ) -> Result<Vec<StepId>, WorkflowDefinitionError> {
        if self.workflow_type.trim().is_empty() {
            return Err(WorkflowDefinitionError::MissingType);
        }
        if self.steps.is_empty() {
            return Err(WorkflowDefinitionError::Empty(self.workflow_type.clone()));
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(&step.id) {
                return Err(WorkflowDefinitionError::DuplicateStep(step.id.clone()));
            }
        }

        for step in &self.steps {
            for dependency in &step.depends_on {
                if !seen.contains(dependency) {
                    return Err(WorkflowDefinitionError::UnknownDependency {
                        step: step.id.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }
            let domains = step
                .fixed_domain()
                .into_iter()
                .chain(step.compensation.as_ref().and_then(|c| c.domain.as_ref()));
            for domain in domains {
                if !domain_known(domain) {
                    return Err(WorkflowDefinitionError::UnknownDomain {
                        step: step.id.clone(),
                        domain: domain.clone(),
                    });
                }
            }
        }

        let order = self.topological_order()?;
        self.check_references()?;
        Ok(order)
    }

    /// Kahn's algorithm; on failure, reports one concrete cycle.
    pub fn topological_order(&self) -> Result<Vec<StepId>, WorkflowDefinitionError> {
        let mut remaining: HashMap<&StepId, usize> = self
            .steps
            .iter()
            .map(|s| (&s.id, s.depends_on.len()))
            .collect();
        let mut order: Vec<StepId> = Vec::with_capacity(self.steps.len());

        loop {
            let next: Vec<&StepId> = self
                .steps
                .iter()
                .map(|s| &s.id)
                .filter(|id| remaining.get(id) == Some(&0))
                .collect();
            if next.is_empty() {
                break;
            }
            for id in next {
                remaining.remove(id);
                order.push(id.clone());
                for dependent in self.dependents_of(id) {
                    if let Some(count) = remaining.get_mut(&dependent.id) {
                        *count = count.saturating_sub(
                            dependent.depends_on.iter().filter(|d| *d == id).count(),
                        );
                    }
                }
            }
        }

        if remaining.is_empty() {
            Ok(order)
        } else {
            Err(WorkflowDefinitionError::Cycle {
                path: self.find_cycle(&remaining.keys().copied().collect()),
            })
        }
    }

    fn find_cycle(&self, candidates: &HashSet<&StepId>) -> Vec<StepId> {
        // Every unsorted step has an unsorted dependency, so following
        // dependencies from any of them must revisit a step.
        let Some(start) = self.steps.iter().find(|s| candidates.contains(&s.id)) else {
            return Vec::new();
        };
        let mut path: Vec<&StepId> = vec![&start.id];
        let mut current = start;
        loop {
            let Some(next_id) = current.depends_on.iter().find(|d| candidates.contains(d)) else {
                return path.into_iter().cloned().collect();
            };
            if let Some(pos) = path.iter().position(|p| *p == next_id) {
                let mut cycle: Vec<StepId> = path[pos..].iter().map(|s| (*s).clone()).collect();
                cycle.push(next_id.clone());
                cycle.reverse();
                return cycle;
            }
            path.push(next_id);
            match self.step(next_id) {
                Some(step) => current = step,
                None => return path.into_iter().cloned().collect(),
            }
        }
    }

    /// Step result references must point at transitive dependencies.
    fn check_references(&self) -> Result<(), WorkflowDefinitionError> {
        for step in &self.steps {
            let invalid = |e: TemplateError| WorkflowDefinitionError::InvalidTemplate {
                step: step.id.clone(),
                reason: e.to_string(),
            };
            let mut refs = template::references(&step.input).map_err(invalid)?;
            if let StepTarget::Classify { classify } = &step.target {
                refs.extend(template::text_references(classify).map_err(invalid)?);
            }
            let mut ancestors = self.ancestors(&step.id);
            Self::check_result_references(step, refs, &ancestors)?;

            // Compensation runs after the step itself, so it may read its own result
            if let Some(compensation) = &step.compensation {
                let refs = template::references(&compensation.payload).map_err(invalid)?;
                ancestors.insert(step.id.as_str());
                Self::check_result_references(step, refs, &ancestors)?;
            }
        }
        Ok(())
    }

    fn check_result_references(
        step: &StepSpec,
        refs: Vec<Reference>,
        allowed: &HashSet<&str>,
    ) -> Result<(), WorkflowDefinitionError> {
        for reference in refs {
            if let Reference::StepResult { step: referenced, .. } = reference {
                if !allowed.contains(referenced.as_str()) {
                    return Err(WorkflowDefinitionError::UndeclaredResultReference {
                        step: step.id.clone(),
                        referenced,
                    });
                }
            }
        }
        Ok(())
    }

    /// Transitive dependencies of `id`.
    pub fn ancestors(&self, id: &StepId) -> HashSet<&str> {
        let mut found = HashSet::new();
        let mut stack: Vec<&StepId> = self
            .step(id)
            .map(|s| s.depends_on.iter().collect())
            .unwrap_or_default();
        while let Some(current) = stack.pop() {
            if !found.insert(current.as_str()) {
                continue;
            }
            if let Some(step) = self.step(current) {
                stack.extend(step.depends_on.iter());
            }
        }
        found
    }
}
