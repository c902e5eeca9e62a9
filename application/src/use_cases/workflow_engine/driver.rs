//! Per-instance driver
//!
//! One driver runs per leased instance. Each pass reloads the instance,
//! dispatches whatever is Ready, and then waits for a step to finish, a
//! backoff to expire, the lease renewal tick, or a local cancel signal.
//! Once nothing is Running after a failure, compensations run one at a time.

use super::WorkflowEngine;
use super::dispatch::{prepare_compensation, prepare_step};
use super::types::{CompensationPlan, StepDispatch, StepOutcome, WorkflowError};
use crate::ports::event_logger::OrchestrationEvent;
use crate::ports::workflow_store::{StoreError, lease_expiry};
use chrono::{DateTime, Utc};
use civic_domain::{
    AttemptOutcome, CompensationStep, InstanceId, RetryPolicy, StepId, WorkflowInstance,
    WorkflowStatus,
};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use serde_json::json;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Reload-and-retry budget for a single transition under write contention.
const MAX_CONFLICT_RETRIES: usize = 8;

/// Removes the instance from the active set when the driver ends.
struct ActiveGuard<'a> {
    active: &'a DashMap<InstanceId, CancellationToken>,
    instance_id: InstanceId,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.active.remove(&self.instance_id);
    }
}

impl WorkflowEngine {
    /// Load, apply `change`, and save if anything changed, retrying on
    /// revision conflicts. Returns the stored instance and the closure's value.
    pub(super) async fn update<T>(
        &self,
        instance_id: &InstanceId,
        mut change: impl FnMut(&mut WorkflowInstance, DateTime<Utc>) -> T,
    ) -> Result<(WorkflowInstance, T), WorkflowError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut instance = self.store.load(instance_id).await?;
            let before = instance.clone();
            let out = change(&mut instance, self.clock.now());
            if instance == before {
                return Ok((instance, out));
            }
            match self.store.save(&instance).await {
                Ok(revision) => {
                    instance.revision = revision;
                    self.publish_changes(&before, &instance);
                    return Ok((instance, out));
                }
                Err(StoreError::Conflict { .. }) if attempt < MAX_CONFLICT_RETRIES => {
                    debug!(instance_id = %instance_id, attempt, "Revision conflict, reloading");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Emit events and progress for every status that changed in a save.
    fn publish_changes(&self, before: &WorkflowInstance, after: &WorkflowInstance) {
        let id = &after.instance_id;
        let at = after.updated_at;

        for (step_id, state) in &after.steps {
            let previous = before.steps.get(step_id);
            let from = previous.map(|s| s.status);
            if from != Some(state.status) {
                debug!(instance_id = %id, step_id = %step_id, to = %state.status, "Step status changed");
                self.events.log(OrchestrationEvent::new(
                    "step_status",
                    at,
                    json!({
                        "instance_id": id,
                        "step_id": step_id,
                        "from": from,
                        "to": state.status,
                        "attempts": state.attempts,
                        "domain": state.executed_domain,
                        "reason": state.error,
                    }),
                ));
                self.progress.on_step_status(id, step_id, state.status);
            }
            if state.compensation_error.is_some()
                && previous.is_none_or(|p| p.compensation_error.is_none())
            {
                error!(
                    instance_id = %id,
                    step_id = %step_id,
                    attempts = state.compensation_attempts,
                    "Compensation failed permanently"
                );
                self.events.log(OrchestrationEvent::new(
                    "compensation_failed",
                    at,
                    json!({
                        "instance_id": id,
                        "step_id": step_id,
                        "attempts": state.compensation_attempts,
                        "reason": state.compensation_error,
                    }),
                ));
            }
        }

        if before.status != after.status {
            let reason = after.failure_report.as_ref().map(|r| r.reason.as_str());
            match after.status {
                WorkflowStatus::Compensating | WorkflowStatus::Failed => {
                    warn!(instance_id = %id, to = %after.status, reason = ?reason, "Workflow status changed")
                }
                _ => info!(instance_id = %id, to = %after.status, "Workflow status changed"),
            }
            self.events.log(OrchestrationEvent::new(
                "workflow_status",
                at,
                json!({
                    "instance_id": id,
                    "workflow_type": after.definition_ref,
                    "from": before.status,
                    "to": after.status,
                    "reason": reason,
                }),
            ));
            self.progress.on_workflow_status(id, after.status);
        }
    }

    fn policy_for(&self, instance: &WorkflowInstance, step_id: &StepId) -> RetryPolicy {
        instance
            .step_spec(step_id)
            .map_or(self.retry, |spec| spec.retry_policy(&self.retry))
    }

    /// Take the lease and drive the instance until it is terminal.
    pub async fn drive_instance(&self, instance_id: &InstanceId) -> Result<WorkflowInstance, WorkflowError> {
        let token = CancellationToken::new();
        match self.active.entry(instance_id.clone()) {
            Entry::Occupied(_) => {
                return Err(WorkflowError::LeaseUnavailable {
                    instance_id: instance_id.clone(),
                    owner: self.owner.clone(),
                    expires_at: lease_expiry(self.clock.now(), self.lease_ttl),
                });
            }
            Entry::Vacant(slot) => {
                slot.insert(token.clone());
            }
        }
        let _guard = ActiveGuard {
            active: &self.active,
            instance_id: instance_id.clone(),
        };

        let lease = self
            .store
            .acquire_lease(instance_id, &self.owner, self.lease_ttl, self.clock.now())
            .await?;
        debug!(instance_id = %instance_id, expires_at = %lease.expires_at, "Lease acquired");

        let result = self.drive(instance_id, &token).await;
        if let Err(e) = self.store.release_lease(instance_id, &self.owner).await {
            warn!(instance_id = %instance_id, error = %e, "Failed to release lease");
        }
        result
    }

    async fn drive(
        &self,
        instance_id: &InstanceId,
        token: &CancellationToken,
    ) -> Result<WorkflowInstance, WorkflowError> {
        let retry = self.retry;
        let (instance, recovered) = self
            .update(instance_id, |inst, now| {
                if inst.is_terminal() {
                    return Vec::new();
                }
                if let Err(e) = inst.definition.validate(|_| true) {
                    inst.mark_failed(format!("embedded definition is invalid: {}", e), now);
                    return Vec::new();
                }
                inst.recover_in_flight(&retry, now)
            })
            .await?;
        if !recovered.is_empty() {
            warn!(instance_id = %instance_id, steps = ?recovered, "Reset steps left running by a previous worker");
        }
        if instance.is_terminal() {
            return Ok(instance);
        }
        self.progress
            .on_workflow_start(instance_id, &instance.definition_ref, instance.steps.len());

        // Dropping the set aborts in-flight steps; the next driver recovers them.
        let mut joins: JoinSet<(StepId, StepOutcome)> = JoinSet::new();
        let mut renewal = tokio::time::interval(self.renewal_interval);
        renewal.set_missed_tick_behavior(MissedTickBehavior::Delay);
        renewal.tick().await;
        let mut cancel_seen = false;

        loop {
            let (mut instance, dispatches) = self
                .update(instance_id, |inst, now| self.plan_dispatch(inst, now))
                .await?;
            for dispatch in dispatches {
                self.spawn_step(&mut joins, instance_id, dispatch);
            }

            if instance.status == WorkflowStatus::Compensating && joins.is_empty() {
                instance = self.compensate(instance_id).await?;
            }
            if instance.is_terminal() {
                info!(instance_id = %instance_id, status = %instance.status, "Workflow finished");
                return Ok(instance);
            }

            let wakeup = instance
                .next_wakeup()
                .map(|at| (at - self.clock.now()).to_std().unwrap_or(Duration::ZERO));

            tokio::select! {
                Some(joined) = joins.join_next(), if !joins.is_empty() => match joined {
                    Ok((step_id, outcome)) => self.apply_outcome(instance_id, &step_id, outcome).await?,
                    Err(e) => warn!(instance_id = %instance_id, error = %e, "Step task ended abnormally"),
                },
                _ = tokio::time::sleep(wakeup.unwrap_or_default()), if wakeup.is_some() => {}
                _ = renewal.tick() => {
                    self.store
                        .acquire_lease(instance_id, &self.owner, self.lease_ttl, self.clock.now())
                        .await?;
                    debug!(instance_id = %instance_id, "Lease renewed");
                }
                _ = token.cancelled(), if !cancel_seen => {
                    cancel_seen = true;
                    debug!(instance_id = %instance_id, "Cancel signal received");
                }
            }
        }
    }

    /// Mark every dispatchable step Running and render its payload.
    fn plan_dispatch(&self, inst: &mut WorkflowInstance, now: DateTime<Utc>) -> Vec<StepDispatch> {
        let mut dispatches = Vec::new();
        for step_id in inst.dispatchable_steps(now) {
            if inst.status != WorkflowStatus::Running {
                break;
            }
            if let Err(e) = inst.mark_running(&step_id, now) {
                warn!(step_id = %step_id, error = %e, "Step not dispatched");
                continue;
            }
            let attempt = inst.step_state(&step_id).map_or(1, |s| s.attempts);
            match prepare_step(inst, &step_id, attempt) {
                Ok(dispatch) => dispatches.push(dispatch),
                Err(reason) => {
                    warn!(step_id = %step_id, reason = %reason, "Step input could not be rendered");
                    let policy = self.policy_for(inst, &step_id);
                    let _ = inst.record_attempt_failure(&step_id, &reason, false, &policy, now);
                }
            }
        }
        inst.evaluate_completion(now);
        dispatches
    }

    fn spawn_step(
        &self,
        joins: &mut JoinSet<(StepId, StepOutcome)>,
        instance_id: &InstanceId,
        dispatch: StepDispatch,
    ) {
        let worker = self.worker();
        let instance_id = instance_id.clone();
        joins.spawn(async move {
            let step_id = dispatch.step_id.clone();
            let outcome = AssertUnwindSafe(worker.run_step(instance_id, dispatch))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| StepOutcome::Failed {
                    error: "step task panicked".to_string(),
                    retryable: false,
                });
            (step_id, outcome)
        });
    }

    async fn apply_outcome(
        &self,
        instance_id: &InstanceId,
        step_id: &StepId,
        outcome: StepOutcome,
    ) -> Result<(), WorkflowError> {
        self.update(instance_id, |inst, now| {
            match &outcome {
                StepOutcome::Succeeded { domain, payload } => {
                    match inst.record_success(step_id, domain.clone(), payload.clone(), now) {
                        Ok(ready) if !ready.is_empty() => {
                            debug!(step_id = %step_id, ready = ?ready, "Dependents ready");
                        }
                        Ok(_) => {}
                        Err(e) => warn!(step_id = %step_id, error = %e, "Step result discarded"),
                    }
                }
                StepOutcome::Failed { error, retryable } => {
                    let policy = self.policy_for(inst, step_id);
                    match inst.record_attempt_failure(step_id, error, *retryable, &policy, now) {
                        Ok(AttemptOutcome::Retry { delay }) => debug!(
                            step_id = %step_id,
                            delay_ms = delay.as_millis() as u64,
                            error = %error,
                            "Step attempt failed, retrying"
                        ),
                        Ok(AttemptOutcome::OptionalFailed) => {
                            warn!(step_id = %step_id, error = %error, "Optional step failed")
                        }
                        Ok(AttemptOutcome::Failed) => {
                            warn!(step_id = %step_id, error = %error, "Step failed")
                        }
                        Err(e) => warn!(step_id = %step_id, error = %e, "Step failure discarded"),
                    }
                }
            }
            inst.evaluate_completion(now);
        })
        .await?;
        Ok(())
    }

    /// Run compensations in reverse topological order until done or until
    /// a retry has to wait for its backoff.
    async fn compensate(&self, instance_id: &InstanceId) -> Result<WorkflowInstance, WorkflowError> {
        let worker = self.worker();
        loop {
            let (instance, plan) = self
                .update(instance_id, |inst, now| self.plan_compensation(inst, now))
                .await?;
            let CompensationPlan::Run(call) = plan else {
                return Ok(instance);
            };

            let step_id = call.step_id.clone();
            let result = worker.run_compensation(call).await;
            self.update(instance_id, |inst, now| match &result {
                Ok(()) => {
                    if let Err(e) = inst.record_compensation_success(&step_id, now) {
                        warn!(step_id = %step_id, error = %e, "Compensation result discarded");
                    }
                }
                Err(error) => {
                    let policy = self.policy_for(inst, &step_id);
                    match inst.record_compensation_failure(&step_id, error, &policy, now) {
                        Ok(Some(delay)) => warn!(
                            step_id = %step_id,
                            delay_ms = delay.as_millis() as u64,
                            error = %error,
                            "Compensation failed, retrying"
                        ),
                        Ok(None) => {}
                        Err(e) => warn!(step_id = %step_id, error = %e, "Compensation failure discarded"),
                    }
                }
            })
            .await?;
        }
    }

    fn plan_compensation(&self, inst: &mut WorkflowInstance, now: DateTime<Utc>) -> CompensationPlan {
        loop {
            match inst.next_compensation(now) {
                CompensationStep::Run(step_id) => {
                    if let Err(e) = inst.mark_compensating(&step_id, now) {
                        warn!(step_id = %step_id, error = %e, "Compensation not dispatched");
                        return CompensationPlan::Idle;
                    }
                    match prepare_compensation(inst, &step_id) {
                        Ok(call) => return CompensationPlan::Run(call),
                        Err(reason) => {
                            let _ = inst.record_compensation_failure(
                                &step_id,
                                &reason,
                                &RetryPolicy::no_retry(),
                                now,
                            );
                        }
                    }
                }
                CompensationStep::Wait => return CompensationPlan::Idle,
                CompensationStep::Done => {
                    inst.finish_compensation(now);
                    return CompensationPlan::Idle;
                }
            }
        }
    }
}
