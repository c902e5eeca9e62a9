//! Step and compensation dispatch
//!
//! Payloads are rendered from the instance while it is being updated; the
//! spawned tasks only talk to the router.

use super::types::{CompensationCall, StepDispatch, StepOutcome, StepRoute};
use crate::ports::progress::WorkflowProgressNotifier;
use crate::use_cases::router::{RouteError, Router};
use civic_domain::workflow::template::{render, render_text};
use civic_domain::{
    ClassificationResult, InstanceId, StepId, StepTarget, TemplateContext, WorkflowInstance,
};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::debug;

fn template_context(instance: &WorkflowInstance) -> TemplateContext<'_> {
    let mut ctx = TemplateContext::new(&instance.input);
    for (step_id, result) in instance.step_results() {
        ctx.insert_result(step_id.as_str(), result);
    }
    ctx
}

/// Render the payload of a step that was just marked Running.
pub(super) fn prepare_step(
    instance: &WorkflowInstance,
    step_id: &StepId,
    attempt: u32,
) -> Result<StepDispatch, String> {
    let spec = instance
        .step_spec(step_id)
        .ok_or_else(|| format!("unknown step {}", step_id))?;
    let ctx = template_context(instance);

    let input = if spec.input.is_null() {
        instance.input.clone()
    } else {
        render(&spec.input, &ctx).map_err(|e| e.to_string())?
    };
    let route = match &spec.target {
        StepTarget::Domain { domain } => StepRoute::Fixed(domain.clone()),
        StepTarget::Classify { classify } => {
            StepRoute::Classify(render_text(classify, &ctx).map_err(|e| e.to_string())?)
        }
    };

    Ok(StepDispatch {
        step_id: step_id.clone(),
        attempt,
        route,
        payload: json!({
            "instance_id": instance.instance_id,
            "workflow_type": instance.definition_ref,
            "step_id": step_id,
            "attempt": attempt,
            "input": input,
        }),
    })
}

/// Render the compensation of a Succeeded step. The step's own result is
/// part of the context.
pub(super) fn prepare_compensation(
    instance: &WorkflowInstance,
    step_id: &StepId,
) -> Result<CompensationCall, String> {
    let spec = instance
        .step_spec(step_id)
        .ok_or_else(|| format!("unknown step {}", step_id))?;
    let compensation = spec
        .compensation
        .as_ref()
        .ok_or_else(|| format!("step {} has no compensation", step_id))?;
    let state = instance
        .step_state(step_id)
        .ok_or_else(|| format!("unknown step {}", step_id))?;

    let payload = render(&compensation.payload, &template_context(instance)).map_err(|e| e.to_string())?;
    let domain = compensation
        .domain
        .clone()
        .or_else(|| state.executed_domain.clone())
        .or_else(|| spec.fixed_domain().cloned());

    Ok(CompensationCall {
        step_id: step_id.clone(),
        domain,
        attempt: state.compensation_attempts,
        payload: json!({
            "instance_id": instance.instance_id,
            "workflow_type": instance.definition_ref,
            "step_id": step_id,
            "action": compensation.action,
            "attempt": state.compensation_attempts,
            "payload": payload,
            "result": state.result.clone().unwrap_or(Value::Null),
        }),
    })
}

/// Runs dispatches on behalf of the engine, bounded by the shared permit pool.
#[derive(Clone)]
pub(super) struct StepWorker {
    pub router: Arc<Router>,
    pub permits: Arc<Semaphore>,
    pub progress: Arc<dyn WorkflowProgressNotifier>,
}

impl StepWorker {
    pub async fn run_step(self, instance_id: InstanceId, dispatch: StepDispatch) -> StepOutcome {
        let Ok(_permit) = self.permits.acquire().await else {
            return StepOutcome::Failed {
                error: "step worker pool closed".to_string(),
                retryable: true,
            };
        };
        self.progress
            .on_step_dispatched(&instance_id, &dispatch.step_id, dispatch.attempt);

        let classification = match dispatch.route {
            StepRoute::Fixed(domain) => ClassificationResult::single(domain),
            StepRoute::Classify(text) => self.router.classify(&text),
        };
        debug!(
            instance_id = %instance_id,
            step_id = %dispatch.step_id,
            attempt = dispatch.attempt,
            top = %classification.top().domain_id,
            "Dispatching step"
        );

        match self.router.route(&classification, dispatch.payload).await {
            Ok(routed) => StepOutcome::Succeeded {
                domain: routed.domain,
                payload: routed.payload,
            },
            Err(e) => StepOutcome::Failed {
                retryable: !matches!(e, RouteError::UnknownDomain(_)),
                error: e.to_string(),
            },
        }
    }

    pub async fn run_compensation(&self, call: CompensationCall) -> Result<(), String> {
        let domain = call
            .domain
            .ok_or_else(|| format!("no domain to compensate step {} on", call.step_id))?;
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| "step worker pool closed".to_string())?;
        debug!(step_id = %call.step_id, domain = %domain, attempt = call.attempt, "Dispatching compensation");
        self.router
            .dispatch_to(&domain, call.payload)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use civic_domain::{CompensationSpec, DomainId, StepSpec, WorkflowDefinition};

    fn instance() -> WorkflowInstance {
        let def = WorkflowDefinition::new(
            "open_restaurant",
            vec![
                StepSpec::to_domain("license", "business")
                    .with_input(json!({ "name": "{{input.name}}", "seats": "{{input.seats}}" }))
                    .with_compensation(
                        CompensationSpec::new("withdraw")
                            .with_payload(json!({ "application": "{{steps.license.result.application_id}}" })),
                    ),
                StepSpec::classified("inspection", "Safety inspection for {{input.name}}")
                    .after(["license"]),
            ],
        );
        let t0 = Utc.with_ymd_and_hms(2025, 4, 1, 12, 0, 0).unwrap();
        WorkflowInstance::start(
            InstanceId::new("wf-7"),
            def,
            json!({ "name": "Cafe Luna", "seats": 40 }),
            t0,
        )
        .unwrap()
    }

    #[test]
    fn test_prepare_step_renders_input() {
        let inst = instance();
        let dispatch = prepare_step(&inst, &StepId::new("license"), 1).unwrap();
        assert!(matches!(dispatch.route, StepRoute::Fixed(ref d) if d.as_str() == "business"));
        assert_eq!(dispatch.payload["input"], json!({ "name": "Cafe Luna", "seats": 40 }));
        assert_eq!(dispatch.payload["step_id"], "license");
        assert_eq!(dispatch.payload["attempt"], 1);
    }

    #[test]
    fn test_prepare_classified_step_renders_text() {
        let inst = instance();
        let dispatch = prepare_step(&inst, &StepId::new("inspection"), 1).unwrap();
        assert!(
            matches!(dispatch.route, StepRoute::Classify(ref text) if text == "Safety inspection for Cafe Luna")
        );
        // Null input forwards the workflow input
        assert_eq!(dispatch.payload["input"]["seats"], 40);
    }

    #[test]
    fn test_prepare_compensation_uses_own_result_and_executed_domain() {
        let mut inst = instance();
        let license = StepId::new("license");
        let t = inst.updated_at;
        inst.mark_running(&license, t).unwrap();
        inst.record_success(
            &license,
            DomainId::new("business_fallback"),
            json!({ "application_id": "APP-17" }),
            t,
        )
        .unwrap();

        let call = prepare_compensation(&inst, &license).unwrap();
        assert_eq!(call.domain, Some(DomainId::new("business_fallback")));
        assert_eq!(call.payload["action"], "withdraw");
        assert_eq!(call.payload["payload"]["application"], "APP-17");
        assert_eq!(call.payload["result"]["application_id"], "APP-17");
    }
}
