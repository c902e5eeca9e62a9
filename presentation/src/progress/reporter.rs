//! Progress reporting for workflow execution

use crate::output::console::ConsoleFormatter;
use civic_application::WorkflowProgressNotifier;
use civic_domain::{InstanceId, StepId, StepStatus, WorkflowStatus};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Mutex;

/// Reports workflow progress with a progress bar counting settled steps
pub struct WorkflowProgressReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl WorkflowProgressReporter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn bar_style() -> ProgressStyle {
        ProgressStyle::default_bar()
            .template("{spinner:.green} {prefix:.bold.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-")
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        let guard = self.bar.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(bar) = guard.as_ref() {
            f(bar);
        }
    }
}

impl Default for WorkflowProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether a step status counts towards the bar.
fn is_settled(status: StepStatus) -> bool {
    matches!(
        status,
        StepStatus::Succeeded | StepStatus::Failed | StepStatus::Skipped
    )
}

impl WorkflowProgressNotifier for WorkflowProgressReporter {
    fn on_workflow_start(&self, _instance_id: &InstanceId, workflow_type: &str, total_steps: usize) {
        let bar = ProgressBar::new(total_steps as u64);
        bar.set_style(Self::bar_style());
        bar.set_prefix(workflow_type.to_string());
        bar.set_message("Starting...");
        bar.enable_steady_tick(std::time::Duration::from_millis(120));
        *self.bar.lock().unwrap_or_else(|e| e.into_inner()) = Some(bar);
    }

    fn on_step_dispatched(&self, _instance_id: &InstanceId, step_id: &StepId, attempt: u32) {
        self.with_bar(|bar| {
            if attempt > 1 {
                bar.set_message(format!("{} (attempt {})", step_id, attempt));
            } else {
                bar.set_message(step_id.to_string());
            }
        });
    }

    fn on_step_status(&self, _instance_id: &InstanceId, step_id: &StepId, status: StepStatus) {
        self.with_bar(|bar| {
            bar.set_message(format!("{} {}", step_id, ConsoleFormatter::step_status(status)));
            if is_settled(status) {
                bar.inc(1);
            }
        });
    }

    fn on_workflow_status(&self, _instance_id: &InstanceId, status: WorkflowStatus) {
        if !status.is_terminal() {
            self.with_bar(|bar| bar.set_message(ConsoleFormatter::workflow_status(status).to_string()));
            return;
        }
        if let Some(bar) = self.bar.lock().unwrap_or_else(|e| e.into_inner()).take() {
            bar.finish_with_message(format!("{}", ConsoleFormatter::workflow_status(status)));
        }
    }
}

/// Simple text-based progress (no fancy UI)
pub struct SimpleProgress;

impl WorkflowProgressNotifier for SimpleProgress {
    fn on_workflow_start(&self, instance_id: &InstanceId, workflow_type: &str, total_steps: usize) {
        println!(
            "{} {} {} ({} steps)",
            "->".cyan(),
            workflow_type.bold(),
            instance_id,
            total_steps
        );
    }

    fn on_step_dispatched(&self, _instance_id: &InstanceId, step_id: &StepId, attempt: u32) {
        println!("  {} {} attempt {}", "..".dimmed(), step_id, attempt);
    }

    fn on_step_status(&self, _instance_id: &InstanceId, step_id: &StepId, status: StepStatus) {
        match status {
            StepStatus::Succeeded | StepStatus::Compensated => {
                println!("  {} {} {}", "v".green(), step_id, status)
            }
            StepStatus::Failed => println!("  {} {} failed", "x".red(), step_id),
            _ => {}
        }
    }

    fn on_workflow_status(&self, _instance_id: &InstanceId, status: WorkflowStatus) {
        println!("{} {}", "=>".cyan(), ConsoleFormatter::workflow_status(status));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settled_statuses() {
        assert!(is_settled(StepStatus::Succeeded));
        assert!(is_settled(StepStatus::Skipped));
        assert!(!is_settled(StepStatus::Running));
        assert!(!is_settled(StepStatus::Compensated));
    }

    #[test]
    fn test_reporter_finishes_on_terminal_status() {
        let reporter = WorkflowProgressReporter::new();
        let id = InstanceId::new("wf-1");
        reporter.on_workflow_start(&id, "open_restaurant", 2);
        reporter.on_step_status(&id, &StepId::new("a"), StepStatus::Succeeded);
        reporter.on_workflow_status(&id, WorkflowStatus::Completed);
        assert!(reporter.bar.lock().unwrap().is_none());
    }
}
