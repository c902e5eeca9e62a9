//! Workflow instance state machine
//!
//! A [`WorkflowInstance`] is the persisted state of one workflow run. All
//! transitions go through methods here so the readiness and compensation
//! invariants hold no matter which worker (or which restart of a worker)
//! drives the instance:
//!
//! - a step becomes Ready only when every dependency has Succeeded
//! - a failed or skipped dependency skips its dependents
//! - Completed requires every required step to be Succeeded or Skipped
//! - compensation visits Succeeded steps in reverse topological order, one
//!   at a time, and only after no step is Running
//!
//! Methods take `now` explicitly; the instance never reads the clock.

use super::definition::{StepSpec, WorkflowDefinition};
use super::validation::WorkflowDefinitionError;
use super::value_objects::{InstanceId, StepId};
use crate::registry::descriptor::DomainId;
use crate::retry::RetryPolicy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    Ready,
    Running,
    Succeeded,
    Failed,
    Skipped,
    Compensated,
}

impl StepStatus {
    pub fn as_str(&self) -> &str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Ready => "ready",
            StepStatus::Running => "running",
            StepStatus::Succeeded => "succeeded",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
            StepStatus::Compensated => "compensated",
        }
    }

    /// No further forward execution will happen for this step.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            StepStatus::Succeeded | StepStatus::Failed | StepStatus::Skipped | StepStatus::Compensated
        )
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Running,
    Completed,
    Failed,
    Compensating,
    Compensated,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &str {
        match self {
            WorkflowStatus::Running => "running",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::Compensating => "compensating",
            WorkflowStatus::Compensated => "compensated",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Compensated
        )
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StepState {
    pub status: StepStatus,
    pub attempts: u32,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    /// Domain that actually handled the step (after fallback)
    #[serde(default)]
    pub executed_domain: Option<DomainId>,
    /// Earliest time the next attempt may be dispatched
    #[serde(default)]
    pub not_before: Option<DateTime<Utc>>,
    #[serde(default)]
    pub compensation_attempts: u32,
    #[serde(default)]
    pub compensation_error: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationFailure {
    pub step_id: StepId,
    pub error: String,
    pub attempts: u32,
}

/// Why an instance left the happy path, and what compensation achieved.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FailureReport {
    pub failed_step: Option<StepId>,
    pub reason: String,
    pub cancelled: bool,
    #[serde(default)]
    pub compensated: Vec<StepId>,
    #[serde(default)]
    pub compensation_failures: Vec<CompensationFailure>,
}

impl FailureReport {
    pub fn is_partial(&self) -> bool {
        !self.compensation_failures.is_empty()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StepTransitionError {
    #[error("unknown step: {0}")]
    UnknownStep(StepId),

    #[error("step {step} cannot go from {from} to {to}")]
    InvalidStepTransition {
        step: StepId,
        from: StepStatus,
        to: StepStatus,
    },

    #[error("instance is {0}")]
    InstanceTerminal(WorkflowStatus),
}

/// What the driver should do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The step is Ready again once `delay` has passed
    Retry { delay: Duration },
    /// An optional step gave up; its dependents were skipped
    OptionalFailed,
    /// A required step gave up; the instance is now Compensating
    Failed,
}

/// Next compensation to run, or why there is none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompensationStep {
    Run(StepId),
    /// A step is still Running or a retry is waiting for its backoff
    Wait,
    Done,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub instance_id: InstanceId,
    /// Workflow type of the definition this instance was started from
    pub definition_ref: String,
    /// Copy of the definition at start time; later catalogue edits never
    /// affect a running instance
    pub definition: WorkflowDefinition,
    pub input: Value,
    pub status: WorkflowStatus,
    pub steps: BTreeMap<StepId, StepState>,
    /// Optimistic-concurrency counter, bumped by the store on every save
    pub revision: u64,
    #[serde(default)]
    pub cancel_requested: bool,
    #[serde(default)]
    pub failure_report: Option<FailureReport>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowInstance {
    /// Create a Running instance with its root steps Ready.
    ///
    /// The definition must already have been validated against the registry.
    pub fn start(
        instance_id: InstanceId,
        definition: WorkflowDefinition,
        input: Value,
        now: DateTime<Utc>,
    ) -> Result<Self, WorkflowDefinitionError> {
        definition.topological_order()?;
        let steps = definition
            .steps
            .iter()
            .map(|s| (s.id.clone(), StepState::default()))
            .collect();
        let mut instance = Self {
            instance_id,
            definition_ref: definition.workflow_type.clone(),
            definition,
            input,
            status: WorkflowStatus::Running,
            steps,
            revision: 0,
            cancel_requested: false,
            failure_report: None,
            created_at: now,
            updated_at: now,
        };
        instance.refresh_readiness();
        Ok(instance)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn step_state(&self, id: &StepId) -> Option<&StepState> {
        self.steps.get(id)
    }

    pub fn step_spec(&self, id: &StepId) -> Option<&StepSpec> {
        self.definition.step(id)
    }

    fn state_mut(&mut self, id: &StepId) -> Result<&mut StepState, StepTransitionError> {
        self.steps
            .get_mut(id)
            .ok_or_else(|| StepTransitionError::UnknownStep(id.clone()))
    }

    fn topological_order(&self) -> Vec<StepId> {
        // Validated at start; a corrupt definition degrades to definition order
        self.definition
            .topological_order()
            .unwrap_or_else(|_| self.definition.steps.iter().map(|s| s.id.clone()).collect())
    }

    fn status_of(&self, id: &StepId) -> Option<StepStatus> {
        self.steps.get(id).map(|s| s.status)
    }

    /// Promote Pending steps whose dependencies all Succeeded and skip those
    /// behind a Failed or Skipped dependency. Repeats until stable so skips
    /// cascade transitively. Returns the steps that became Ready.
    pub fn refresh_readiness(&mut self) -> Vec<StepId> {
        let mut promoted = Vec::new();
        if self.status != WorkflowStatus::Running {
            return promoted;
        }
        loop {
            let mut changed = false;
            for spec in &self.definition.steps {
                if self.steps.get(&spec.id).map(|s| s.status) != Some(StepStatus::Pending) {
                    continue;
                }
                let dep_statuses: Vec<Option<StepStatus>> =
                    spec.depends_on.iter().map(|d| self.status_of(d)).collect();
                let blocked = dep_statuses
                    .iter()
                    .any(|s| matches!(s, Some(StepStatus::Failed) | Some(StepStatus::Skipped)));
                let ready = dep_statuses
                    .iter()
                    .all(|s| *s == Some(StepStatus::Succeeded));
                if let Some(state) = self.steps.get_mut(&spec.id) {
                    if blocked {
                        state.status = StepStatus::Skipped;
                        state.error = Some("dependency did not succeed".to_string());
                        changed = true;
                    } else if ready {
                        state.status = StepStatus::Ready;
                        promoted.push(spec.id.clone());
                        changed = true;
                    }
                }
            }
            if !changed {
                break;
            }
        }
        promoted
    }

    /// Ready steps whose backoff (if any) has elapsed, in topological order.
    pub fn dispatchable_steps(&self, now: DateTime<Utc>) -> Vec<StepId> {
        if self.status != WorkflowStatus::Running {
            return Vec::new();
        }
        self.topological_order()
            .into_iter()
            .filter(|id| {
                self.steps.get(id).is_some_and(|s| {
                    s.status == StepStatus::Ready && s.not_before.is_none_or(|t| t <= now)
                })
            })
            .collect()
    }

    /// Earliest pending backoff deadline, forward or compensation.
    pub fn next_wakeup(&self) -> Option<DateTime<Utc>> {
        self.steps.values().filter_map(|s| s.not_before).min()
    }

    pub fn running_steps(&self) -> Vec<StepId> {
        self.steps
            .iter()
            .filter(|(_, s)| s.status == StepStatus::Running)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Ready -> Running. Counts the attempt before any dispatch happens.
    pub fn mark_running(&mut self, id: &StepId, now: DateTime<Utc>) -> Result<(), StepTransitionError> {
        if self.status != WorkflowStatus::Running {
            return Err(StepTransitionError::InstanceTerminal(self.status));
        }
        let state = self.state_mut(id)?;
        if state.status != StepStatus::Ready {
            return Err(StepTransitionError::InvalidStepTransition {
                step: id.clone(),
                from: state.status,
                to: StepStatus::Running,
            });
        }
        state.status = StepStatus::Running;
        state.attempts += 1;
        state.not_before = None;
        if state.started_at.is_none() {
            state.started_at = Some(now);
        }
        self.updated_at = now;
        Ok(())
    }

    fn expect_running(&mut self, id: &StepId, to: StepStatus) -> Result<&mut StepState, StepTransitionError> {
        let state = self.state_mut(id)?;
        if state.status != StepStatus::Running {
            return Err(StepTransitionError::InvalidStepTransition {
                step: id.clone(),
                from: state.status,
                to,
            });
        }
        Ok(state)
    }

    /// Running -> Succeeded, then recompute readiness.
    pub fn record_success(
        &mut self,
        id: &StepId,
        domain: DomainId,
        result: Value,
        now: DateTime<Utc>,
    ) -> Result<Vec<StepId>, StepTransitionError> {
        let state = self.expect_running(id, StepStatus::Succeeded)?;
        state.status = StepStatus::Succeeded;
        state.result = Some(result);
        state.error = None;
        state.executed_domain = Some(domain);
        state.finished_at = Some(now);
        self.updated_at = now;
        Ok(self.refresh_readiness())
    }

    /// A failed attempt of a Running step.
    ///
    /// While the instance is Running and `retryable` is set, the step goes
    /// back to Ready with a backoff deadline until `policy` is exhausted.
    /// Once compensation has begun no retries are made.
    pub fn record_attempt_failure(
        &mut self,
        id: &StepId,
        error: &str,
        retryable: bool,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> Result<AttemptOutcome, StepTransitionError> {
        let instance_running = self.status == WorkflowStatus::Running;
        let optional = self.step_spec(id).is_some_and(|s| s.optional);
        let state = self.expect_running(id, StepStatus::Failed)?;
        state.error = Some(error.to_string());
        let retry_delay = if instance_running && retryable && policy.should_retry(state.attempts) {
            let delay = policy.delay_for(state.attempts);
            state.status = StepStatus::Ready;
            state.not_before = Some(now + chrono::Duration::from_std(delay).unwrap_or_default());
            Some(delay)
        } else {
            state.status = StepStatus::Failed;
            state.finished_at = Some(now);
            None
        };
        self.updated_at = now;

        if let Some(delay) = retry_delay {
            return Ok(AttemptOutcome::Retry { delay });
        }
        if !instance_running {
            return Ok(AttemptOutcome::Failed);
        }
        if optional {
            self.refresh_readiness();
            return Ok(AttemptOutcome::OptionalFailed);
        }
        self.begin_compensation(Some(id.clone()), error.to_string(), false, now);
        Ok(AttemptOutcome::Failed)
    }

    /// Running -> Compensating. Pending and Ready steps are skipped; Running
    /// steps are left to finish.
    pub fn begin_compensation(
        &mut self,
        failed_step: Option<StepId>,
        reason: String,
        cancelled: bool,
        now: DateTime<Utc>,
    ) {
        if self.status != WorkflowStatus::Running {
            return;
        }
        for state in self.steps.values_mut() {
            if matches!(state.status, StepStatus::Pending | StepStatus::Ready) {
                state.status = StepStatus::Skipped;
                state.not_before = None;
            }
        }
        self.status = WorkflowStatus::Compensating;
        self.failure_report = Some(FailureReport {
            failed_step,
            reason,
            cancelled,
            ..FailureReport::default()
        });
        self.updated_at = now;
    }

    /// Mark the instance cancelled. Returns false when already terminal.
    pub fn request_cancel(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.cancel_requested = true;
        self.begin_compensation(None, "cancelled by caller".to_string(), true, now);
        self.updated_at = now;
        true
    }

    /// Running -> Completed once every required step is Succeeded or Skipped
    /// and optional steps are settled.
    pub fn evaluate_completion(&mut self, now: DateTime<Utc>) -> bool {
        if self.status != WorkflowStatus::Running {
            return false;
        }
        let done = self.definition.steps.iter().all(|spec| {
            match self.status_of(&spec.id) {
                Some(StepStatus::Succeeded) | Some(StepStatus::Skipped) => true,
                Some(StepStatus::Failed) => spec.optional,
                _ => false,
            }
        });
        if done {
            self.status = WorkflowStatus::Completed;
            self.updated_at = now;
        }
        done
    }

    /// Pick the next compensation in reverse topological order.
    ///
    /// Succeeded steps without a compensation action are marked Compensated
    /// on the way, since there is nothing to undo.
    pub fn next_compensation(&mut self, now: DateTime<Utc>) -> CompensationStep {
        if self.status != WorkflowStatus::Compensating {
            return CompensationStep::Done;
        }
        if self.steps.values().any(|s| s.status == StepStatus::Running) {
            return CompensationStep::Wait;
        }
        for id in self.topological_order().into_iter().rev() {
            let has_action = self.step_spec(&id).is_some_and(|s| s.compensation.is_some());
            let Some(state) = self.steps.get_mut(&id) else {
                continue;
            };
            if state.status != StepStatus::Succeeded || state.compensation_error.is_some() {
                continue;
            }
            if !has_action {
                state.status = StepStatus::Compensated;
                self.updated_at = now;
                continue;
            }
            if state.not_before.is_some_and(|t| t > now) {
                return CompensationStep::Wait;
            }
            return CompensationStep::Run(id);
        }
        CompensationStep::Done
    }

    /// Count a compensation attempt before it is dispatched.
    pub fn mark_compensating(&mut self, id: &StepId, now: DateTime<Utc>) -> Result<(), StepTransitionError> {
        let state = self.state_mut(id)?;
        if state.status != StepStatus::Succeeded {
            return Err(StepTransitionError::InvalidStepTransition {
                step: id.clone(),
                from: state.status,
                to: StepStatus::Compensated,
            });
        }
        state.compensation_attempts += 1;
        state.not_before = None;
        self.updated_at = now;
        Ok(())
    }

    pub fn record_compensation_success(
        &mut self,
        id: &StepId,
        now: DateTime<Utc>,
    ) -> Result<(), StepTransitionError> {
        let state = self.state_mut(id)?;
        if state.status != StepStatus::Succeeded {
            return Err(StepTransitionError::InvalidStepTransition {
                step: id.clone(),
                from: state.status,
                to: StepStatus::Compensated,
            });
        }
        state.status = StepStatus::Compensated;
        state.finished_at = Some(now);
        if let Some(report) = self.failure_report.as_mut() {
            report.compensated.push(id.clone());
        }
        self.updated_at = now;
        Ok(())
    }

    /// Returns the retry delay, or `None` once the policy is exhausted and
    /// the failure has been added to the report.
    pub fn record_compensation_failure(
        &mut self,
        id: &StepId,
        error: &str,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> Result<Option<Duration>, StepTransitionError> {
        let state = self.state_mut(id)?;
        if policy.should_retry(state.compensation_attempts) {
            let delay = policy.delay_for(state.compensation_attempts);
            state.not_before = Some(now + chrono::Duration::from_std(delay).unwrap_or_default());
            self.updated_at = now;
            return Ok(Some(delay));
        }
        state.compensation_error = Some(error.to_string());
        let attempts = state.compensation_attempts;
        let report = self.failure_report.get_or_insert_with(FailureReport::default);
        report.compensation_failures.push(CompensationFailure {
            step_id: id.clone(),
            error: error.to_string(),
            attempts,
        });
        self.updated_at = now;
        Ok(None)
    }

    /// Compensating -> Compensated. Only valid once nothing is left to run.
    pub fn finish_compensation(&mut self, now: DateTime<Utc>) -> bool {
        if self.status != WorkflowStatus::Compensating {
            return false;
        }
        if self.steps.values().any(|s| s.status == StepStatus::Running) {
            return false;
        }
        self.status = WorkflowStatus::Compensated;
        self.updated_at = now;
        true
    }

    /// Terminal failure for an instance that cannot be driven at all.
    pub fn mark_failed(&mut self, reason: String, now: DateTime<Utc>) {
        if self.is_terminal() {
            return;
        }
        self.status = WorkflowStatus::Failed;
        let report = self.failure_report.get_or_insert_with(FailureReport::default);
        report.reason = reason;
        self.updated_at = now;
    }

    /// Reset steps left Running by a crashed worker.
    ///
    /// The lost attempt stays counted: while the instance is Running the step
    /// is retried if its policy allows, otherwise it fails terminally. During
    /// compensation the outcome cannot be known, so the step is marked Failed.
    pub fn recover_in_flight(&mut self, default_policy: &RetryPolicy, now: DateTime<Utc>) -> Vec<StepId> {
        let running = self.running_steps();
        for id in &running {
            let policy = self
                .step_spec(id)
                .map(|s| s.retry_policy(default_policy))
                .unwrap_or(*default_policy);
            let reason = "interrupted: worker lost while step was running";
            if self.status == WorkflowStatus::Running {
                let _ = self.record_attempt_failure(id, reason, true, &policy, now);
                // Retry immediately on takeover; the backoff served its purpose
                if let Some(state) = self.steps.get_mut(id) {
                    if state.status == StepStatus::Ready {
                        state.not_before = None;
                    }
                }
            } else if let Some(state) = self.steps.get_mut(id) {
                state.status = StepStatus::Failed;
                state.error = Some(reason.to_string());
                state.finished_at = Some(now);
            }
        }
        running
    }

    /// Context for rendering step templates.
    pub fn step_results(&self) -> impl Iterator<Item = (&StepId, &Value)> {
        self.steps
            .iter()
            .filter_map(|(id, s)| s.result.as_ref().map(|r| (id, r)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::definition::CompensationSpec;
    use chrono::TimeZone;
    use serde_json::json;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
    }

    fn sid(s: &str) -> StepId {
        StepId::new(s)
    }

    /// A -> (B, C)
    fn fan_out() -> WorkflowDefinition {
        WorkflowDefinition::new(
            "fan_out",
            vec![
                StepSpec::to_domain("a", "business")
                    .with_compensation(CompensationSpec::new("undo_a")),
                StepSpec::to_domain("b", "permits").after(["a"]),
                StepSpec::to_domain("c", "safety")
                    .after(["a"])
                    .with_compensation(CompensationSpec::new("undo_c")),
            ],
        )
    }

    fn start(def: WorkflowDefinition) -> WorkflowInstance {
        WorkflowInstance::start(InstanceId::new("wf-1"), def, json!({}), t0()).unwrap()
    }

    fn run_ok(instance: &mut WorkflowInstance, id: &str) {
        instance.mark_running(&sid(id), t0()).unwrap();
        instance
            .record_success(&sid(id), DomainId::new("x"), json!({"ok": id}), t0())
            .unwrap();
    }

    #[test]
    fn test_roots_start_ready() {
        let instance = start(fan_out());
        assert_eq!(instance.status, WorkflowStatus::Running);
        assert_eq!(instance.step_state(&sid("a")).unwrap().status, StepStatus::Ready);
        assert_eq!(instance.step_state(&sid("b")).unwrap().status, StepStatus::Pending);
    }

    #[test]
    fn test_dependents_become_ready_together() {
        let mut instance = start(fan_out());
        instance.mark_running(&sid("a"), t0()).unwrap();
        let promoted = instance
            .record_success(&sid("a"), DomainId::new("business"), json!({}), t0())
            .unwrap();
        assert_eq!(promoted, vec![sid("b"), sid("c")]);
        assert_eq!(instance.dispatchable_steps(t0()), vec![sid("b"), sid("c")]);
    }

    #[test]
    fn test_cannot_run_pending_step() {
        let mut instance = start(fan_out());
        assert!(matches!(
            instance.mark_running(&sid("b"), t0()),
            Err(StepTransitionError::InvalidStepTransition { .. })
        ));
    }

    #[test]
    fn test_all_success_completes() {
        let mut instance = start(fan_out());
        for id in ["a", "b", "c"] {
            run_ok(&mut instance, id);
        }
        assert!(instance.evaluate_completion(t0()));
        assert_eq!(instance.status, WorkflowStatus::Completed);
        assert!(instance.is_terminal());
    }

    #[test]
    fn test_retry_sets_backoff_deadline() {
        let mut instance = start(fan_out());
        let policy = RetryPolicy::default();
        instance.mark_running(&sid("a"), t0()).unwrap();
        let outcome = instance
            .record_attempt_failure(&sid("a"), "timeout", true, &policy, t0())
            .unwrap();
        assert_eq!(
            outcome,
            AttemptOutcome::Retry {
                delay: Duration::from_millis(200)
            }
        );
        assert!(instance.dispatchable_steps(t0()).is_empty());
        let later = t0() + chrono::Duration::milliseconds(200);
        assert_eq!(instance.dispatchable_steps(later), vec![sid("a")]);
    }

    #[test]
    fn test_exhausted_required_step_compensates_in_reverse_order() {
        let mut instance = start(fan_out());
        let policy = RetryPolicy::no_retry();
        run_ok(&mut instance, "a");
        run_ok(&mut instance, "c");
        instance.mark_running(&sid("b"), t0()).unwrap();
        let outcome = instance
            .record_attempt_failure(&sid("b"), "rejected", true, &policy, t0())
            .unwrap();
        assert_eq!(outcome, AttemptOutcome::Failed);
        assert_eq!(instance.status, WorkflowStatus::Compensating);

        assert_eq!(instance.next_compensation(t0()), CompensationStep::Run(sid("c")));
        instance.mark_compensating(&sid("c"), t0()).unwrap();
        instance.record_compensation_success(&sid("c"), t0()).unwrap();
        assert_eq!(instance.next_compensation(t0()), CompensationStep::Run(sid("a")));
        instance.mark_compensating(&sid("a"), t0()).unwrap();
        instance.record_compensation_success(&sid("a"), t0()).unwrap();
        assert_eq!(instance.next_compensation(t0()), CompensationStep::Done);
        assert!(instance.finish_compensation(t0()));

        let report = instance.failure_report.as_ref().unwrap();
        assert_eq!(report.failed_step, Some(sid("b")));
        assert_eq!(report.compensated, vec![sid("c"), sid("a")]);
        assert!(!report.is_partial());
    }

    #[test]
    fn test_sibling_not_started_is_skipped_on_failure() {
        let mut instance = start(fan_out());
        run_ok(&mut instance, "a");
        instance.mark_running(&sid("b"), t0()).unwrap();
        instance
            .record_attempt_failure(&sid("b"), "rejected", true, &RetryPolicy::no_retry(), t0())
            .unwrap();
        assert_eq!(instance.step_state(&sid("c")).unwrap().status, StepStatus::Skipped);
        assert_eq!(instance.next_compensation(t0()), CompensationStep::Run(sid("a")));
    }

    #[test]
    fn test_compensation_waits_for_running_steps() {
        let mut instance = start(fan_out());
        run_ok(&mut instance, "a");
        instance.mark_running(&sid("b"), t0()).unwrap();
        instance.mark_running(&sid("c"), t0()).unwrap();
        instance
            .record_attempt_failure(&sid("b"), "rejected", false, &RetryPolicy::default(), t0())
            .unwrap();
        assert_eq!(instance.next_compensation(t0()), CompensationStep::Wait);
        assert!(!instance.finish_compensation(t0()));

        instance
            .record_success(&sid("c"), DomainId::new("safety"), json!({}), t0())
            .unwrap();
        assert_eq!(instance.next_compensation(t0()), CompensationStep::Run(sid("c")));
    }

    #[test]
    fn test_steps_without_action_count_as_compensated() {
        let def = WorkflowDefinition::new(
            "plain",
            vec![
                StepSpec::to_domain("a", "business"),
                StepSpec::to_domain("b", "permits").after(["a"]),
            ],
        );
        let mut instance = start(def);
        run_ok(&mut instance, "a");
        instance.mark_running(&sid("b"), t0()).unwrap();
        instance
            .record_attempt_failure(&sid("b"), "boom", false, &RetryPolicy::default(), t0())
            .unwrap();
        assert_eq!(instance.next_compensation(t0()), CompensationStep::Done);
        assert_eq!(instance.step_state(&sid("a")).unwrap().status, StepStatus::Compensated);
    }

    #[test]
    fn test_compensation_failure_recorded_and_others_continue() {
        let mut instance = start(fan_out());
        let policy = RetryPolicy::no_retry();
        run_ok(&mut instance, "a");
        run_ok(&mut instance, "c");
        instance.mark_running(&sid("b"), t0()).unwrap();
        instance
            .record_attempt_failure(&sid("b"), "rejected", false, &policy, t0())
            .unwrap();

        instance.mark_compensating(&sid("c"), t0()).unwrap();
        let retry = instance
            .record_compensation_failure(&sid("c"), "safety office down", &policy, t0())
            .unwrap();
        assert_eq!(retry, None);
        assert_eq!(instance.next_compensation(t0()), CompensationStep::Run(sid("a")));

        let report = instance.failure_report.as_ref().unwrap();
        assert!(report.is_partial());
        assert_eq!(report.compensation_failures[0].step_id, sid("c"));
    }

    #[test]
    fn test_optional_failure_skips_dependents_transitively() {
        let def = WorkflowDefinition::new(
            "optional",
            vec![
                StepSpec::to_domain("a", "business").optional(),
                StepSpec::to_domain("b", "permits").after(["a"]),
                StepSpec::to_domain("c", "safety").after(["b"]),
                StepSpec::to_domain("d", "safety"),
            ],
        );
        let mut instance = start(def);
        instance.mark_running(&sid("a"), t0()).unwrap();
        let outcome = instance
            .record_attempt_failure(&sid("a"), "nope", false, &RetryPolicy::default(), t0())
            .unwrap();
        assert_eq!(outcome, AttemptOutcome::OptionalFailed);
        assert_eq!(instance.status, WorkflowStatus::Running);
        assert_eq!(instance.step_state(&sid("b")).unwrap().status, StepStatus::Skipped);
        assert_eq!(instance.step_state(&sid("c")).unwrap().status, StepStatus::Skipped);

        run_ok(&mut instance, "d");
        assert!(instance.evaluate_completion(t0()));
    }

    #[test]
    fn test_cancel_skips_pending_and_ready() {
        let mut instance = start(fan_out());
        run_ok(&mut instance, "a");
        instance.mark_running(&sid("b"), t0()).unwrap();
        assert!(instance.request_cancel(t0()));
        assert_eq!(instance.status, WorkflowStatus::Compensating);
        assert_eq!(instance.step_state(&sid("b")).unwrap().status, StepStatus::Running);
        assert_eq!(instance.step_state(&sid("c")).unwrap().status, StepStatus::Skipped);
        assert!(instance.failure_report.as_ref().unwrap().cancelled);
    }

    #[test]
    fn test_cancel_terminal_is_refused() {
        let mut instance = start(fan_out());
        instance.mark_failed("corrupt".to_string(), t0());
        assert!(!instance.request_cancel(t0()));
    }

    #[test]
    fn test_recover_running_step_keeps_attempt() {
        let mut instance = start(fan_out());
        instance.mark_running(&sid("a"), t0()).unwrap();
        let recovered = instance.recover_in_flight(&RetryPolicy::default(), t0());
        assert_eq!(recovered, vec![sid("a")]);
        let state = instance.step_state(&sid("a")).unwrap();
        assert_eq!(state.status, StepStatus::Ready);
        assert_eq!(state.attempts, 1);
        assert_eq!(instance.dispatchable_steps(t0()), vec![sid("a")]);
    }

    #[test]
    fn test_recover_with_exhausted_attempts_fails_step() {
        let mut instance = start(fan_out());
        instance.mark_running(&sid("a"), t0()).unwrap();
        instance.recover_in_flight(&RetryPolicy::no_retry(), t0());
        assert_eq!(instance.step_state(&sid("a")).unwrap().status, StepStatus::Failed);
        assert_eq!(instance.status, WorkflowStatus::Compensating);
    }

    #[test]
    fn test_serde_roundtrip_preserves_state() {
        let mut instance = start(fan_out());
        run_ok(&mut instance, "a");
        let json = serde_json::to_string(&instance).unwrap();
        let restored: WorkflowInstance = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, instance);
    }
}
