//! Console output formatter

use crate::output::formatter::OutputFormatter;
use civic_application::{ProbeOutcome, RecoveryOutcome, RegistryOverview, RoutedResponse};
use civic_domain::{
    CircuitState, ClassificationResult, DomainId, StepStatus, StepTarget, WorkflowDefinition,
    WorkflowInstance, WorkflowStatus,
};
use colored::{ColoredString, Colorize};

/// Formats command results for console display
pub struct ConsoleFormatter;

impl ConsoleFormatter {
    pub fn format_classification(text: &str, result: &ClassificationResult) -> String {
        let mut output = String::new();
        output.push_str(&format!("{} {}\n\n", "Issue:".cyan().bold(), text));

        for (rank, candidate) in result.ranked().iter().enumerate() {
            let line = format!(
                "{:>2}. {:<20} {:.3}",
                rank + 1,
                candidate.domain_id.as_str(),
                candidate.score
            );
            if rank == 0 {
                output.push_str(&format!("{}\n", line.green().bold()));
            } else {
                output.push_str(&format!("{}\n", line));
            }
        }

        if result.general_fallback() {
            output.push_str(&format!(
                "\n{}\n",
                "No domain matched strongly; routed to the general domain.".yellow()
            ));
        }
        output
    }

    pub fn format_routed(routed: &RoutedResponse) -> String {
        let mut output = String::new();
        output.push_str(&Self::header("Issue Routed"));
        output.push('\n');

        output.push_str(&format!(
            "{} {} ({})\n",
            "Domain:".cyan().bold(),
            routed.display_name,
            routed.domain
        ));
        output.push_str(&format!(
            "{} {}\n",
            "Resolution path:".cyan().bold(),
            routed.resolution_path
        ));
        if routed.fallback_used {
            output.push_str(&format!(
                "{} top candidate {} was unavailable\n",
                "Fallback:".yellow().bold(),
                routed.classification.top().domain_id
            ));
        }
        output.push_str(&format!(
            "{} {} attempt(s), {} ms\n",
            "Dispatch:".cyan().bold(),
            routed.attempts,
            routed.elapsed_ms
        ));

        output.push_str(&Self::section_header("Handler response"));
        let body = serde_json::to_string_pretty(&routed.payload).unwrap_or_default();
        output.push_str(&Self::indent(&body, "  "));
        output.push('\n');
        output.push_str(&Self::footer());
        output
    }

    pub fn format_overview(overview: &RegistryOverview) -> String {
        let mut output = String::new();
        output.push_str(&format!(
            "{:<20} {:<28} {:<16} {:<10} {}\n",
            "DOMAIN".bold(),
            "NAME".bold(),
            "PATH".bold(),
            "CIRCUIT".bold(),
            "FAILURES".bold()
        ));
        for domain in &overview.domains {
            output.push_str(&format!(
                "{:<20} {:<28} {:<16} {:<10} {}",
                domain.id.as_str(),
                domain.display_name,
                domain.resolution_path.as_str(),
                Self::circuit(domain.state),
                domain.consecutive_failures
            ));
            if let Some(failure) = &domain.last_failure {
                output.push_str(&format!("  {}", failure.dimmed()));
            }
            output.push('\n');
        }

        let summary = &overview.summary;
        output.push_str(&format!(
            "\n{} {}/{} available ({:.1}%)\n",
            "Summary:".cyan().bold(),
            summary.available,
            summary.total,
            summary.availability_pct
        ));
        output
    }

    pub fn format_probes(probes: &[(DomainId, ProbeOutcome)], overview: &RegistryOverview) -> String {
        let mut output = String::new();
        output.push_str(&Self::section_header("Probe results"));
        for (domain, outcome) in probes {
            let line = match outcome {
                ProbeOutcome::Healthy => format!("  {} {}", "v".green(), domain),
                ProbeOutcome::Unhealthy(reason) => {
                    format!("  {} {} {}", "x".red(), domain, reason.dimmed())
                }
                ProbeOutcome::Skipped => format!("  {} {} (circuit open)", "-".yellow(), domain),
            };
            output.push_str(&line);
            output.push('\n');
        }
        output.push('\n');
        output.push_str(&Self::format_overview(overview));
        output
    }

    pub fn format_workflow_types(definitions: &[WorkflowDefinition]) -> String {
        let mut output = String::new();
        for definition in definitions {
            output.push_str(&format!("{}\n", definition.workflow_type.cyan().bold()));
            if !definition.description.is_empty() {
                output.push_str(&format!("  {}\n", definition.description.dimmed()));
            }
            for step in &definition.steps {
                let target = match &step.target {
                    StepTarget::Domain { domain } => domain.to_string(),
                    StepTarget::Classify { .. } => "(classified)".to_string(),
                };
                let after = if step.depends_on.is_empty() {
                    String::new()
                } else {
                    let deps: Vec<&str> = step.depends_on.iter().map(|d| d.as_str()).collect();
                    format!(" after {}", deps.join(", "))
                };
                let flags = if step.optional { " [optional]" } else { "" };
                output.push_str(&format!("  - {} -> {}{}{}\n", step.id, target, after, flags));
            }
            output.push('\n');
        }
        if definitions.is_empty() {
            output.push_str("No workflow types registered.\n");
        }
        output
    }

    pub fn format_instance(instance: &WorkflowInstance) -> String {
        let mut output = String::new();
        output.push_str(&Self::header(&format!("Workflow {}", instance.definition_ref)));
        output.push('\n');
        output.push_str(&format!("{} {}\n", "Instance:".cyan().bold(), instance.instance_id));
        output.push_str(&format!(
            "{} {}\n",
            "Status:".cyan().bold(),
            Self::workflow_status(instance.status)
        ));
        output.push_str(&format!(
            "{} {}  {} {}\n",
            "Created:".dimmed(),
            instance.created_at.to_rfc3339(),
            "Updated:".dimmed(),
            instance.updated_at.to_rfc3339()
        ));

        output.push_str(&Self::section_header("Steps"));
        for spec in &instance.definition.steps {
            let Some(state) = instance.step_state(&spec.id) else {
                continue;
            };
            let mut line = format!(
                "  {:<22} {:<12} attempts: {}",
                spec.id.as_str(),
                Self::step_status(state.status),
                state.attempts
            );
            if let Some(domain) = &state.executed_domain {
                line.push_str(&format!("  via {}", domain));
            }
            if let Some(error) = &state.error {
                line.push_str(&format!("  {}", error.red()));
            }
            output.push_str(&line);
            output.push('\n');
        }

        if let Some(report) = &instance.failure_report {
            output.push_str(&Self::section_header("Failure report"));
            let cause = if report.cancelled { "cancelled" } else { "failed" };
            output.push_str(&format!("  {} {}\n", cause.yellow().bold(), report.reason));
            if let Some(step) = &report.failed_step {
                output.push_str(&format!("  failed step: {}\n", step));
            }
            if !report.compensated.is_empty() {
                let ids: Vec<&str> = report.compensated.iter().map(|s| s.as_str()).collect();
                output.push_str(&format!("  compensated: {}\n", ids.join(", ")));
            }
            for failure in &report.compensation_failures {
                output.push_str(&format!(
                    "  {} compensation of {} failed after {} attempt(s): {}\n",
                    "!".red().bold(),
                    failure.step_id,
                    failure.attempts,
                    failure.error
                ));
            }
        }

        output.push_str(&Self::footer());
        output
    }

    pub fn format_recovery(outcomes: &[RecoveryOutcome]) -> String {
        if outcomes.is_empty() {
            return "No unfinished workflow instances.\n".to_string();
        }
        let mut output = String::new();
        for outcome in outcomes {
            let line = match (&outcome.status, &outcome.error) {
                (Some(status), _) => format!(
                    "  {} {} ({}) -> {}",
                    "v".green(),
                    outcome.instance_id,
                    outcome.workflow_type,
                    Self::workflow_status(*status)
                ),
                (None, error) => format!(
                    "  {} {} ({}) {}",
                    "x".red(),
                    outcome.instance_id,
                    outcome.workflow_type,
                    error.as_deref().unwrap_or("not resumed").dimmed()
                ),
            };
            output.push_str(&line);
            output.push('\n');
        }
        output
    }

    fn circuit(state: CircuitState) -> ColoredString {
        match state {
            CircuitState::Closed => state.as_str().green(),
            CircuitState::HalfOpen => state.as_str().yellow(),
            CircuitState::Open => state.as_str().red(),
        }
    }

    pub(crate) fn workflow_status(status: WorkflowStatus) -> ColoredString {
        match status {
            WorkflowStatus::Completed => status.as_str().green().bold(),
            WorkflowStatus::Running | WorkflowStatus::Compensating => status.as_str().yellow(),
            WorkflowStatus::Compensated => status.as_str().yellow().bold(),
            WorkflowStatus::Failed => status.as_str().red().bold(),
        }
    }

    pub(crate) fn step_status(status: StepStatus) -> ColoredString {
        match status {
            StepStatus::Succeeded => status.as_str().green(),
            StepStatus::Failed => status.as_str().red(),
            StepStatus::Running => status.as_str().cyan(),
            StepStatus::Compensated | StepStatus::Skipped => status.as_str().yellow(),
            StepStatus::Pending | StepStatus::Ready => status.as_str().dimmed(),
        }
    }

    fn header(title: &str) -> String {
        let line = "=".repeat(60);
        format!("{}\n{:^60}\n{}", line.cyan(), title.bold(), line.cyan())
    }

    fn section_header(title: &str) -> String {
        format!("\n{}\n{}\n", title.cyan().bold(), "-".repeat(40))
    }

    fn footer() -> String {
        format!("\n{}\n", "=".repeat(60).cyan())
    }

    /// Indent a multi-line string
    pub fn indent(text: &str, prefix: &str) -> String {
        text.lines()
            .map(|line| format!("{}{}", prefix, line))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl OutputFormatter for ConsoleFormatter {
    fn format_classification(&self, text: &str, result: &ClassificationResult) -> String {
        Self::format_classification(text, result)
    }

    fn format_routed(&self, routed: &RoutedResponse) -> String {
        Self::format_routed(routed)
    }

    fn format_overview(&self, overview: &RegistryOverview) -> String {
        Self::format_overview(overview)
    }

    fn format_probes(&self, probes: &[(DomainId, ProbeOutcome)], overview: &RegistryOverview) -> String {
        Self::format_probes(probes, overview)
    }

    fn format_workflow_types(&self, definitions: &[WorkflowDefinition]) -> String {
        Self::format_workflow_types(definitions)
    }

    fn format_instance(&self, instance: &WorkflowInstance) -> String {
        Self::format_instance(instance)
    }

    fn format_recovery(&self, outcomes: &[RecoveryOutcome]) -> String {
        Self::format_recovery(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use civic_domain::{DomainScore, InstanceId, StepSpec};
    use serde_json::json;

    fn plain() {
        colored::control::set_override(false);
    }

    #[test]
    fn test_indent() {
        assert_eq!(ConsoleFormatter::indent("a\nb", "  "), "  a\n  b");
    }

    #[test]
    fn test_classification_lists_ranked_domains() {
        plain();
        let result = ClassificationResult::new(
            vec![
                DomainScore { domain_id: DomainId::new("parking"), score: 0.75 },
                DomainScore { domain_id: DomainId::new("general"), score: 0.0 },
            ],
            false,
        )
        .unwrap();
        let out = ConsoleFormatter::format_classification("blocked driveway", &result);
        assert!(out.contains(" 1. parking"));
        assert!(out.contains("0.750"));
        assert!(!out.contains("general domain"));
    }

    #[test]
    fn test_instance_shows_steps_in_definition_order() {
        plain();
        let def = civic_domain::WorkflowDefinition::new(
            "two_step",
            vec![
                StepSpec::to_domain("first", "parking"),
                StepSpec::to_domain("second", "permits").after(["first"]),
            ],
        );
        let now = Utc.with_ymd_and_hms(2025, 7, 1, 12, 0, 0).unwrap();
        let instance = WorkflowInstance::start(InstanceId::new("wf-1"), def, json!({}), now).unwrap();
        let out = ConsoleFormatter::format_instance(&instance);
        let first = out.find("first").unwrap();
        let second = out.find("second").unwrap();
        assert!(first < second);
        assert!(out.contains("running"));
        assert!(out.contains("ready"));
    }
}
