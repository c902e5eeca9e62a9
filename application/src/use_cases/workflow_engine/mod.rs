//! Workflow Engine
//!
//! Executes declarative multi-step workflows against the routed domains.
//!
//! | Operation            | Effect                                                  |
//! |----------------------|---------------------------------------------------------|
//! | `create_workflow`    | validate against the registry, persist Running instance |
//! | `start_workflow`     | create, then drive on a background task                 |
//! | `run_workflow`       | create, then drive until terminal                       |
//! | `get_status`         | read the persisted snapshot                             |
//! | `cancel_workflow`    | skip outstanding steps and compensate                   |
//! | `recover`            | resume every non-terminal instance with a free lease    |
//!
//! The store is the single source of truth: every transition is a
//! load-modify-save against it, and a driver holds the instance lease for
//! as long as it runs. A worker that dies mid-step leaves the step Running;
//! the next driver resets it and retries.

mod dispatch;
mod driver;
mod types;

pub use types::{RecoveryOutcome, WorkflowError};

use crate::config::OrchestrationParams;
use crate::ports::clock::Clock;
use crate::ports::event_logger::{EventLogger, NoEventLogger, OrchestrationEvent};
use crate::ports::progress::{NoWorkflowProgress, WorkflowProgressNotifier};
use crate::ports::workflow_store::WorkflowStore;
use crate::use_cases::router::Router;
use civic_domain::{InstanceId, RetryPolicy, WorkflowDefinition, WorkflowInstance};
use dashmap::DashMap;
use dispatch::StepWorker;
use futures::future::join_all;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub struct WorkflowEngine {
    router: Arc<Router>,
    store: Arc<dyn WorkflowStore>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventLogger>,
    progress: Arc<dyn WorkflowProgressNotifier>,
    catalogue: RwLock<BTreeMap<String, WorkflowDefinition>>,
    retry: RetryPolicy,
    lease_ttl: Duration,
    renewal_interval: Duration,
    permits: Arc<Semaphore>,
    owner: String,
    /// Instances driven by this engine, with the token that wakes their driver
    active: DashMap<InstanceId, CancellationToken>,
}

impl WorkflowEngine {
    pub fn new(
        router: Arc<Router>,
        store: Arc<dyn WorkflowStore>,
        clock: Arc<dyn Clock>,
        params: &OrchestrationParams,
    ) -> Self {
        Self {
            router,
            store,
            clock,
            events: Arc::new(NoEventLogger),
            progress: Arc::new(NoWorkflowProgress),
            catalogue: RwLock::new(BTreeMap::new()),
            retry: params.retry,
            lease_ttl: params.lease_ttl,
            renewal_interval: params.lease_renewal_interval(),
            permits: Arc::new(Semaphore::new(params.max_in_flight_steps.max(1))),
            owner: format!("engine-{}", uuid::Uuid::new_v4()),
            active: DashMap::new(),
        }
    }

    pub fn with_event_logger(mut self, events: Arc<dyn EventLogger>) -> Self {
        self.events = events;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn WorkflowProgressNotifier>) -> Self {
        self.progress = progress;
        self
    }

    /// Lease owner name; must be unique per running engine.
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    pub fn with_definitions(
        self,
        definitions: impl IntoIterator<Item = WorkflowDefinition>,
    ) -> Result<Self, WorkflowError> {
        for definition in definitions {
            self.register_definition(definition)?;
        }
        Ok(self)
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Add or replace a workflow type. Structure is checked here; domain
    /// references are checked against the live registry at start time.
    pub fn register_definition(&self, definition: WorkflowDefinition) -> Result<(), WorkflowError> {
        definition.validate(|_| true)?;
        info!(workflow_type = %definition.workflow_type, steps = definition.steps.len(), "Registered workflow type");
        self.catalogue
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(definition.workflow_type.clone(), definition);
        Ok(())
    }

    /// Registered workflow definitions, ordered by type.
    pub fn list_workflow_types(&self) -> Vec<WorkflowDefinition> {
        self.catalogue
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    fn definition(&self, workflow_type: &str) -> Result<WorkflowDefinition, WorkflowError> {
        self.catalogue
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(workflow_type)
            .cloned()
            .ok_or_else(|| WorkflowError::UnknownWorkflowType(workflow_type.to_string()))
    }

    fn worker(&self) -> StepWorker {
        StepWorker {
            router: Arc::clone(&self.router),
            permits: Arc::clone(&self.permits),
            progress: Arc::clone(&self.progress),
        }
    }

    /// Validate and persist a new Running instance without driving it.
    pub async fn create_workflow(
        &self,
        workflow_type: &str,
        input: Value,
    ) -> Result<WorkflowInstance, WorkflowError> {
        let definition = self.definition(workflow_type)?;
        let snapshot = self.router.registry().snapshot();
        definition.validate(|domain| snapshot.contains(domain))?;

        let now = self.clock.now();
        let mut instance = WorkflowInstance::start(InstanceId::generate(), definition, input, now)?;
        instance.revision = self.store.create(&instance).await?;

        info!(
            instance_id = %instance.instance_id,
            workflow_type = %workflow_type,
            "Workflow started"
        );
        self.events.log(OrchestrationEvent::new(
            "workflow_status",
            now,
            json!({
                "instance_id": instance.instance_id,
                "workflow_type": workflow_type,
                "from": null,
                "to": instance.status,
                "reason": "started",
            }),
        ));
        Ok(instance)
    }

    /// Create an instance and drive it on a background task.
    pub async fn start_workflow(
        self: &Arc<Self>,
        workflow_type: &str,
        input: Value,
    ) -> Result<InstanceId, WorkflowError> {
        let instance = self.create_workflow(workflow_type, input).await?;
        let instance_id = instance.instance_id.clone();
        let engine = Arc::clone(self);
        let id = instance_id.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.drive_instance(&id).await {
                error!(instance_id = %id, error = %e, "Workflow driver stopped");
            }
        });
        Ok(instance_id)
    }

    /// Create an instance and drive it to a terminal status.
    pub async fn run_workflow(
        &self,
        workflow_type: &str,
        input: Value,
    ) -> Result<WorkflowInstance, WorkflowError> {
        let instance = self.create_workflow(workflow_type, input).await?;
        self.drive_instance(&instance.instance_id).await
    }

    /// Persisted snapshot of an instance.
    pub async fn get_status(&self, instance_id: &InstanceId) -> Result<WorkflowInstance, WorkflowError> {
        Ok(self.store.load(instance_id).await?)
    }

    /// Cancel an instance: outstanding steps are skipped and completed ones
    /// compensated. When no driver holds the instance, compensation runs
    /// here and the returned snapshot is terminal.
    pub async fn cancel_workflow(&self, instance_id: &InstanceId) -> Result<WorkflowInstance, WorkflowError> {
        let (instance, accepted) = self
            .update(instance_id, |inst, now| inst.request_cancel(now))
            .await?;
        if !accepted {
            return Err(WorkflowError::AlreadyTerminal {
                instance_id: instance_id.clone(),
                status: instance.status,
            });
        }
        info!(instance_id = %instance_id, "Workflow cancel requested");

        if let Some(token) = self.active.get(instance_id) {
            token.cancel();
            return Ok(instance);
        }
        match self.drive_instance(instance_id).await {
            Ok(instance) => Ok(instance),
            // Another worker holds the lease and will compensate on its next renewal
            Err(WorkflowError::LeaseUnavailable { owner, .. }) => {
                info!(instance_id = %instance_id, owner = %owner, "Cancel handed to lease holder");
                Ok(instance)
            }
            Err(e) => Err(e),
        }
    }

    /// Resume every non-terminal instance in the store whose lease is free.
    pub async fn recover(&self) -> Result<Vec<RecoveryOutcome>, WorkflowError> {
        let pending: Vec<WorkflowInstance> = self
            .store
            .list()
            .await?
            .into_iter()
            .filter(|i| !i.is_terminal() && !self.active.contains_key(&i.instance_id))
            .collect();
        info!(count = pending.len(), "Recovering workflow instances");

        let runs = pending.iter().map(|instance| async move {
            let result = self.drive_instance(&instance.instance_id).await;
            if let Err(e) = &result {
                warn!(instance_id = %instance.instance_id, error = %e, "Instance not resumed");
            }
            RecoveryOutcome {
                instance_id: instance.instance_id.clone(),
                workflow_type: instance.definition_ref.clone(),
                status: result.as_ref().ok().map(|i| i.status),
                error: result.err().map(|e| e.to_string()),
            }
        });
        Ok(join_all(runs).await)
    }
}
