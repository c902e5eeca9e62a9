//! Submit Issue use case.
//!
//! The single-request path: classify a citizen report, route it to the best
//! available domain handler (with retries and fallbacks) and return the
//! routed response together with the domain's resolution path.

use crate::error::OrchestrationError;
use crate::ports::event_logger::{EventLogger, NoEventLogger, OrchestrationEvent};
use crate::use_cases::router::{RoutedResponse, Router};
use chrono::Utc;
use civic_domain::{ClassificationResult, IssueReport, Priority, RetryPolicy};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

/// Input for the [`SubmitIssueUseCase`].
#[derive(Debug, Clone)]
pub struct SubmitIssueInput {
    pub text: String,
    pub location: Option<String>,
    pub priority: Priority,
}

impl SubmitIssueInput {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            location: None,
            priority: Priority::default(),
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Validate into an [`IssueReport`].
    pub fn into_report(self) -> Result<IssueReport, OrchestrationError> {
        let mut report = IssueReport::new(self.text)?.with_priority(self.priority);
        if let Some(location) = self.location {
            report = report.with_location(location);
        }
        Ok(report)
    }
}

pub struct SubmitIssueUseCase {
    router: Arc<Router>,
    retry: RetryPolicy,
    events: Arc<dyn EventLogger>,
}

impl SubmitIssueUseCase {
    pub fn new(router: Arc<Router>, retry: RetryPolicy) -> Self {
        Self {
            router,
            retry,
            events: Arc::new(NoEventLogger),
        }
    }

    pub fn with_event_logger(mut self, events: Arc<dyn EventLogger>) -> Self {
        self.events = events;
        self
    }

    /// Classification only; nothing is dispatched.
    pub fn classify(&self, text: &str) -> ClassificationResult {
        self.router.classify(text)
    }

    pub async fn execute(&self, input: SubmitIssueInput) -> Result<RoutedResponse, OrchestrationError> {
        let report = input.into_report()?;
        self.submit(&report).await
    }

    /// Route an already validated report.
    pub async fn submit(&self, report: &IssueReport) -> Result<RoutedResponse, OrchestrationError> {
        let classification = self.classify(report.text());
        if classification.general_fallback() {
            info!("{}", OrchestrationError::ClassificationEmpty);
        }

        let result = self
            .router
            .route_with_retry(&classification, report.to_payload(), &self.retry)
            .await;

        match result {
            Ok(routed) => {
                info!(
                    domain = %routed.domain,
                    resolution_path = %routed.resolution_path,
                    fallback_used = routed.fallback_used,
                    attempts = routed.attempts,
                    "Issue routed"
                );
                self.events.log(OrchestrationEvent::new(
                    "issue_routed",
                    Utc::now(),
                    json!({
                        "domain": routed.domain,
                        "top_candidate": classification.top().domain_id,
                        "score": classification.top().score,
                        "fallback_used": routed.fallback_used,
                        "general_fallback": classification.general_fallback(),
                        "attempts": routed.attempts,
                        "priority": report.priority().as_str(),
                    }),
                ));
                Ok(routed)
            }
            Err(e) => {
                warn!(error = %e, "Issue could not be routed");
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::clock::SystemClock;
    use crate::ports::domain_handler::{DomainHandler, HandlerError};
    use crate::use_cases::domain_registry::DomainRegistry;
    use crate::use_cases::health_monitor::HealthMonitor;
    use async_trait::async_trait;
    use civic_domain::{
        CircuitBreakerPolicy, Classifier, ClassifierConfig, DomainDescriptor, Endpoint,
        ResolutionPath, Signature,
    };
    use serde_json::Value;
    use std::sync::Mutex;
    use std::time::Duration;

    struct EchoHandler {
        down: Vec<&'static str>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl DomainHandler for EchoHandler {
        async fn invoke(
            &self,
            domain: &DomainDescriptor,
            payload: Value,
            _timeout: Duration,
        ) -> Result<Value, HandlerError> {
            self.calls.lock().unwrap().push(domain.id.to_string());
            if self.down.contains(&domain.id.as_str()) {
                return Err(HandlerError::Transport("connection refused".into()));
            }
            Ok(json!({ "ticket": format!("{}-1", domain.id), "received": payload }))
        }

        async fn probe(&self, _domain: &DomainDescriptor, _timeout: Duration) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    fn use_case(down: Vec<&'static str>) -> (SubmitIssueUseCase, Arc<EchoHandler>) {
        let registry = Arc::new(
            DomainRegistry::with_domains([
                DomainDescriptor::new(
                    "noise",
                    Signature::keywords(["noise", "loud", "music"]),
                    Endpoint::new("http://noise.local"),
                )
                .with_resolution_path(ResolutionPath::CommunityFirst)
                .with_fallbacks(["general"]),
                DomainDescriptor::new("general", Signature::empty(), Endpoint::new("http://general.local")),
            ])
            .unwrap(),
        );
        let handler = Arc::new(EchoHandler {
            down,
            calls: Mutex::new(Vec::new()),
        });
        let monitor = Arc::new(HealthMonitor::new(
            registry.clone(),
            handler.clone(),
            Arc::new(SystemClock),
            Arc::new(NoEventLogger),
            CircuitBreakerPolicy::default(),
        ));
        let classifier = Arc::new(Classifier::with_default_scorer(ClassifierConfig::default()));
        let router = Arc::new(Router::new(registry, classifier, monitor, handler.clone()));
        let retry = RetryPolicy {
            max_attempts: 2,
            base_delay_ms: 1,
            backoff_factor: 1.0,
            max_delay_ms: 1,
        };
        (SubmitIssueUseCase::new(router, retry), handler)
    }

    #[tokio::test]
    async fn test_submit_routes_and_forwards_report() {
        let (uc, _) = use_case(vec![]);
        let input = SubmitIssueInput::new("Loud music from the bar every night")
            .with_location("5th Ave")
            .with_priority(Priority::High);

        let routed = uc.execute(input).await.unwrap();
        assert_eq!(routed.domain.as_str(), "noise");
        assert_eq!(routed.resolution_path, ResolutionPath::CommunityFirst);
        assert_eq!(routed.payload["received"]["location"], "5th Ave");
        assert_eq!(routed.payload["received"]["priority"], "high");
    }

    #[tokio::test]
    async fn test_short_report_rejected_before_dispatch() {
        let (uc, handler) = use_case(vec![]);
        let err = uc.execute(SubmitIssueInput::new("loud")).await.unwrap_err();
        assert!(matches!(err, OrchestrationError::Invalid(_)));
        assert!(handler.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unmatched_text_goes_to_general() {
        let (uc, _) = use_case(vec![]);
        let routed = uc
            .execute(SubmitIssueInput::new("Something odd about the lamp post paint"))
            .await
            .unwrap();
        assert_eq!(routed.domain.as_str(), "general");
        assert!(routed.classification.general_fallback());
    }

    #[tokio::test]
    async fn test_handler_failure_is_retried_then_reported() {
        let (uc, handler) = use_case(vec!["noise"]);
        let err = uc
            .execute(SubmitIssueInput::new("Loud music from the bar every night"))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::HandlerError { ref domain, .. } if domain.as_str() == "noise"));
        assert!(err.is_transient());
        assert_eq!(handler.calls.lock().unwrap().len(), 2);
    }
}
