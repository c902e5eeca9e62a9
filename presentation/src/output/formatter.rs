//! Output formatter trait

use civic_application::{ProbeOutcome, RecoveryOutcome, RegistryOverview, RoutedResponse};
use civic_domain::{ClassificationResult, DomainId, OutputFormat, WorkflowDefinition, WorkflowInstance};
use serde::Serialize;

/// Renders command results
pub trait OutputFormatter {
    fn format_classification(&self, text: &str, result: &ClassificationResult) -> String;

    fn format_routed(&self, routed: &RoutedResponse) -> String;

    fn format_overview(&self, overview: &RegistryOverview) -> String;

    fn format_probes(&self, probes: &[(DomainId, ProbeOutcome)], overview: &RegistryOverview) -> String;

    fn format_workflow_types(&self, definitions: &[WorkflowDefinition]) -> String;

    fn format_instance(&self, instance: &WorkflowInstance) -> String;

    fn format_recovery(&self, outcomes: &[RecoveryOutcome]) -> String;
}

/// Formatter for the requested format
pub fn formatter_for(format: OutputFormat) -> Box<dyn OutputFormatter> {
    match format {
        OutputFormat::Text => Box::new(super::console::ConsoleFormatter),
        OutputFormat::Json => Box::new(JsonFormatter),
    }
}

/// Pretty-printed JSON, one document per command
pub struct JsonFormatter;

impl JsonFormatter {
    fn render<T: Serialize + ?Sized>(value: &T) -> String {
        serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
    }
}

impl OutputFormatter for JsonFormatter {
    fn format_classification(&self, text: &str, result: &ClassificationResult) -> String {
        Self::render(&serde_json::json!({ "text": text, "classification": result }))
    }

    fn format_routed(&self, routed: &RoutedResponse) -> String {
        Self::render(routed)
    }

    fn format_overview(&self, overview: &RegistryOverview) -> String {
        Self::render(overview)
    }

    fn format_probes(&self, probes: &[(DomainId, ProbeOutcome)], overview: &RegistryOverview) -> String {
        let rows: Vec<serde_json::Value> = probes
            .iter()
            .map(|(domain, outcome)| serde_json::json!({ "domain": domain, "probe": outcome }))
            .collect();
        Self::render(&serde_json::json!({ "probes": rows, "overview": overview }))
    }

    fn format_workflow_types(&self, definitions: &[WorkflowDefinition]) -> String {
        Self::render(definitions)
    }

    fn format_instance(&self, instance: &WorkflowInstance) -> String {
        Self::render(instance)
    }

    fn format_recovery(&self, outcomes: &[RecoveryOutcome]) -> String {
        Self::render(outcomes)
    }
}
