//! Workflow progress port
//!
//! Defines the interface for reporting progress while a workflow runs.

use civic_domain::{InstanceId, StepId, StepStatus, WorkflowStatus};

/// Callback for progress updates during workflow execution
///
/// Implementations live in the presentation layer and can display
/// progress in various ways (progress bars, JSON lines, etc.)
pub trait WorkflowProgressNotifier: Send + Sync {
    /// Called once when the engine starts driving an instance
    fn on_workflow_start(&self, instance_id: &InstanceId, workflow_type: &str, total_steps: usize);

    /// Called when a step attempt is dispatched
    fn on_step_dispatched(&self, instance_id: &InstanceId, step_id: &StepId, attempt: u32);

    /// Called whenever a step changes status
    fn on_step_status(&self, instance_id: &InstanceId, step_id: &StepId, status: StepStatus);

    /// Called whenever the instance changes status
    fn on_workflow_status(&self, _instance_id: &InstanceId, _status: WorkflowStatus) {}
}

/// No-op progress notifier for when progress reporting is not needed
pub struct NoWorkflowProgress;

impl WorkflowProgressNotifier for NoWorkflowProgress {
    fn on_workflow_start(&self, _instance_id: &InstanceId, _workflow_type: &str, _total_steps: usize) {}
    fn on_step_dispatched(&self, _instance_id: &InstanceId, _step_id: &StepId, _attempt: u32) {}
    fn on_step_status(&self, _instance_id: &InstanceId, _step_id: &StepId, _status: StepStatus) {}
}
