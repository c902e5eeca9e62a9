//! Router
//!
//! Picks the best available handler for a classified request and dispatches
//! to it. Candidates are walked in rank order; a candidate whose breaker is
//! open is replaced by its fallbacks before the next-ranked candidate is
//! tried. Handler outcomes are fed back to the health monitor.

use crate::ports::domain_handler::{DomainHandler, HandlerError};
use crate::use_cases::domain_registry::DomainRegistry;
use crate::use_cases::health_monitor::{AdmissionPermit, HealthMonitor};
use civic_domain::{
    ClassificationResult, Classifier, DomainDescriptor, DomainId, RegistrySnapshot,
    ResolutionPath, RetryPolicy,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RouteError {
    /// Every candidate and every fallback is open. Not retried internally.
    #[error("All handlers unavailable (tried: {})", display_ids(.tried))]
    AllHandlersUnavailable { tried: Vec<DomainId> },

    #[error("Handler for '{domain}' failed: {error}")]
    Handler { domain: DomainId, error: HandlerError },

    #[error("Unknown domain: {0}")]
    UnknownDomain(DomainId),
}

fn display_ids(ids: &[DomainId]) -> String {
    if ids.is_empty() {
        return "none".to_string();
    }
    ids.iter().map(|id| id.as_str()).collect::<Vec<_>>().join(", ")
}

impl RouteError {
    /// Handler failures may succeed on another attempt; the rest will not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RouteError::Handler { .. })
    }
}

/// The handler chosen for one attempt, holding its breaker admission.
#[derive(Debug)]
pub struct Selection<'a> {
    pub descriptor: DomainDescriptor,
    /// True unless the top-ranked candidate was chosen
    pub fallback_used: bool,
    /// Domains passed over because their breaker refused admission
    pub skipped: Vec<DomainId>,
    pub permit: AdmissionPermit<'a>,
}

/// Outcome of a routed request.
#[derive(Debug, Clone, Serialize)]
pub struct RoutedResponse {
    pub domain: DomainId,
    pub display_name: String,
    pub resolution_path: ResolutionPath,
    pub fallback_used: bool,
    pub classification: ClassificationResult,
    pub attempts: u32,
    pub payload: Value,
    pub elapsed_ms: u64,
}

pub struct Router {
    registry: Arc<DomainRegistry>,
    classifier: Arc<Classifier>,
    monitor: Arc<HealthMonitor>,
    handler: Arc<dyn DomainHandler>,
    dispatch_timeout: Duration,
}

impl Router {
    pub fn new(
        registry: Arc<DomainRegistry>,
        classifier: Arc<Classifier>,
        monitor: Arc<HealthMonitor>,
        handler: Arc<dyn DomainHandler>,
    ) -> Self {
        Self {
            registry,
            classifier,
            monitor,
            handler,
            dispatch_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_dispatch_timeout(mut self, timeout: Duration) -> Self {
        self.dispatch_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &Arc<DomainRegistry> {
        &self.registry
    }

    pub fn monitor(&self) -> &Arc<HealthMonitor> {
        &self.monitor
    }

    /// Classify against the current registry snapshot.
    pub fn classify(&self, text: &str) -> ClassificationResult {
        self.classifier.classify(text, &self.registry.snapshot())
    }

    /// Choose a handler for `classification`.
    ///
    /// An admitted half-open domain has its trial claimed by the returned
    /// permit; dropping the selection unused hands the trial back.
    pub fn select(
        &self,
        classification: &ClassificationResult,
        snapshot: &RegistrySnapshot,
    ) -> Result<Selection<'_>, RouteError> {
        let mut seen: HashSet<&DomainId> = HashSet::new();
        let mut skipped = Vec::new();
        let mut known_candidate = false;
        let top = &classification.top().domain_id;

        for candidate in classification.domain_ids() {
            let Some(descriptor) = snapshot.get(candidate) else {
                debug!(domain = %candidate, "Candidate no longer registered");
                continue;
            };
            known_candidate = true;

            let chain = std::iter::once(&descriptor.id).chain(descriptor.fallback_ids.iter());
            for id in chain {
                if !seen.insert(id) {
                    continue;
                }
                let Some(target) = snapshot.get(id) else {
                    warn!(domain = %descriptor.id, fallback = %id, "Fallback is not registered");
                    continue;
                };
                if let Ok(permit) = self.monitor.claim(id) {
                    let fallback_used = id != top;
                    if fallback_used {
                        info!(selected = %id, top = %top, "Routing to fallback");
                    }
                    return Ok(Selection {
                        descriptor: target.clone(),
                        fallback_used,
                        skipped,
                        permit,
                    });
                }
                debug!(domain = %id, "Circuit open, skipping");
                skipped.push(id.clone());
            }
        }

        if !known_candidate {
            return Err(RouteError::UnknownDomain(top.clone()));
        }
        warn!(tried = %display_ids(&skipped), "All handlers unavailable");
        Err(RouteError::AllHandlersUnavailable { tried: skipped })
    }

    /// Invoke one handler under the dispatch timeout and report the outcome
    /// through `permit`.
    async fn invoke(
        &self,
        descriptor: &DomainDescriptor,
        permit: AdmissionPermit<'_>,
        payload: Value,
    ) -> Result<Value, RouteError> {
        let id = &descriptor.id;
        let result = match tokio::time::timeout(
            self.dispatch_timeout,
            self.handler.invoke(descriptor, payload, self.dispatch_timeout),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(HandlerError::Timeout(self.dispatch_timeout)),
        };

        match result {
            Ok(value) => {
                permit.succeeded();
                Ok(value)
            }
            Err(error) => {
                warn!(domain = %id, error = %error, "Handler failed");
                permit.failed(&error);
                Err(RouteError::Handler {
                    domain: id.clone(),
                    error,
                })
            }
        }
    }

    /// Single attempt: select a handler and dispatch `payload` to it.
    pub async fn route(
        &self,
        classification: &ClassificationResult,
        payload: Value,
    ) -> Result<RoutedResponse, RouteError> {
        self.route_with_retry(classification, payload, &RetryPolicy::no_retry())
            .await
    }

    /// Route with retries on handler failure. Selection is redone on every
    /// attempt so a breaker that opened in between is honoured.
    pub async fn route_with_retry(
        &self,
        classification: &ClassificationResult,
        payload: Value,
        policy: &RetryPolicy,
    ) -> Result<RoutedResponse, RouteError> {
        let started = Instant::now();
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let snapshot = self.registry.snapshot();
            let Selection {
                descriptor,
                fallback_used,
                permit,
                ..
            } = self.select(classification, &snapshot)?;
            debug!(domain = %descriptor.id, attempt = attempts, "Dispatching");

            match self.invoke(&descriptor, permit, payload.clone()).await {
                Ok(response) => {
                    return Ok(RoutedResponse {
                        domain: descriptor.id,
                        display_name: descriptor.display_name,
                        resolution_path: descriptor.resolution_path,
                        fallback_used,
                        classification: classification.clone(),
                        attempts,
                        payload: response,
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    });
                }
                Err(e) if e.is_retryable() && policy.should_retry(attempts) => {
                    let delay = policy.delay_for(attempts);
                    debug!(attempt = attempts, delay_ms = delay.as_millis() as u64, "Retrying route");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Dispatch straight to `domain` with no fallback (used for compensation).
    pub async fn dispatch_to(&self, domain: &DomainId, payload: Value) -> Result<Value, RouteError> {
        let descriptor = self
            .registry
            .lookup(domain)
            .map_err(|_| RouteError::UnknownDomain(domain.clone()))?;
        let permit = self
            .monitor
            .claim(domain)
            .map_err(|_| RouteError::AllHandlersUnavailable {
                tried: vec![domain.clone()],
            })?;
        self.invoke(&descriptor, permit, payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::clock::ManualClock;
    use crate::ports::event_logger::NoEventLogger;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use crate::error::OrchestrationError;
    use civic_domain::{
        Admission, CircuitBreakerPolicy, CircuitState, ClassifierConfig, Endpoint, Signature,
    };
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Fails for domains in `failing`; records every invocation.
    #[derive(Default)]
    struct ScriptedHandler {
        failing: Mutex<HashSet<String>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedHandler {
        fn failing(ids: &[&str]) -> Self {
            Self {
                failing: Mutex::new(ids.iter().map(|s| s.to_string()).collect()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls_to(&self, id: &str) -> usize {
            self.calls.lock().unwrap().iter().filter(|c| *c == id).count()
        }
    }

    #[async_trait]
    impl DomainHandler for ScriptedHandler {
        async fn invoke(
            &self,
            domain: &DomainDescriptor,
            payload: Value,
            _timeout: Duration,
        ) -> Result<Value, HandlerError> {
            self.calls.lock().unwrap().push(domain.id.to_string());
            if self.failing.lock().unwrap().contains(domain.id.as_str()) {
                return Err(HandlerError::Rejected("503 Service Unavailable".to_string()));
            }
            Ok(json!({ "handled_by": domain.id, "echo": payload }))
        }

        async fn probe(&self, _domain: &DomainDescriptor, _timeout: Duration) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    fn registry() -> Arc<DomainRegistry> {
        Arc::new(
            DomainRegistry::with_domains([
                DomainDescriptor::new(
                    "parking",
                    Signature::keywords(["park", "driveway"]),
                    Endpoint::new("http://parking.local"),
                )
                .with_fallbacks(["general"]),
                DomainDescriptor::new(
                    "permits",
                    Signature::keywords(["permit", "license"]),
                    Endpoint::new("http://permits.local"),
                )
                .with_resolution_path(ResolutionPath::Documents),
                DomainDescriptor::new("general", Signature::empty(), Endpoint::new("http://general.local")),
            ])
            .unwrap(),
        )
    }

    /// Answers after `delay`, or never when `delay` is `None`.
    struct SlowHandler {
        delay: Option<Duration>,
    }

    #[async_trait]
    impl DomainHandler for SlowHandler {
        async fn invoke(
            &self,
            domain: &DomainDescriptor,
            _payload: Value,
            _timeout: Duration,
        ) -> Result<Value, HandlerError> {
            match self.delay {
                Some(delay) => tokio::time::sleep(delay).await,
                None => std::future::pending::<()>().await,
            }
            Ok(json!({ "handled_by": domain.id }))
        }

        async fn probe(&self, _domain: &DomainDescriptor, _timeout: Duration) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()))
    }

    fn router(handler: Arc<ScriptedHandler>) -> Router {
        router_with(handler, clock())
    }

    fn router_with(handler: Arc<dyn DomainHandler>, clock: Arc<ManualClock>) -> Router {
        let registry = registry();
        let monitor = Arc::new(HealthMonitor::new(
            registry.clone(),
            handler.clone(),
            clock,
            Arc::new(NoEventLogger),
            CircuitBreakerPolicy::default(),
        ));
        let classifier = Arc::new(Classifier::with_default_scorer(ClassifierConfig::default()));
        Router::new(registry, classifier, monitor, handler)
    }

    #[tokio::test]
    async fn test_routes_driveway_issue_to_parking() {
        let handler = Arc::new(ScriptedHandler::default());
        let router = router(handler.clone());

        let classification = router.classify("car parked in my driveway");
        assert_eq!(classification.top().domain_id.as_str(), "parking");
        assert!(classification.top().score >= 0.5);

        let routed = router.route(&classification, json!({"text": "x"})).await.unwrap();
        assert_eq!(routed.domain.as_str(), "parking");
        assert!(!routed.fallback_used);
        assert_eq!(routed.attempts, 1);
        assert_eq!(routed.payload["handled_by"], "parking");
        assert_eq!(handler.calls_to("parking"), 1);
    }

    #[tokio::test]
    async fn test_open_circuit_routes_to_fallback_without_contacting_handler() {
        let handler = Arc::new(ScriptedHandler::failing(&["parking"]));
        let router = router(handler.clone());
        let classification = router.classify("car parked in my driveway");

        for _ in 0..5 {
            let err = router.route(&classification, json!({})).await.unwrap_err();
            assert!(matches!(err, RouteError::Handler { .. }));
        }
        assert_eq!(router.monitor().state(&DomainId::new("parking")), CircuitState::Open);

        for _ in 0..3 {
            let routed = router.route(&classification, json!({})).await.unwrap();
            assert_eq!(routed.domain.as_str(), "general");
            assert!(routed.fallback_used);
        }
        assert_eq!(handler.calls_to("parking"), 5);
        assert_eq!(handler.calls_to("general"), 3);
    }

    #[tokio::test]
    async fn test_all_handlers_unavailable() {
        let handler = Arc::new(ScriptedHandler::failing(&["permits"]));
        let router = router(handler.clone());
        let classification = ClassificationResult::single(DomainId::new("permits"));

        for _ in 0..5 {
            let _ = router.route(&classification, json!({})).await;
        }
        let err = router.route(&classification, json!({})).await.unwrap_err();
        assert_eq!(
            err,
            RouteError::AllHandlersUnavailable {
                tried: vec![DomainId::new("permits")]
            }
        );
        assert!(!err.is_retryable());
        assert_eq!(handler.calls_to("permits"), 5);
    }

    #[tokio::test]
    async fn test_route_with_retry_counts_attempts() {
        let handler = Arc::new(ScriptedHandler::failing(&["permits"]));
        let router = router(handler.clone());
        let classification = ClassificationResult::single(DomainId::new("permits"));
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1,
            backoff_factor: 1.0,
            max_delay_ms: 1,
        };

        let err = router
            .route_with_retry(&classification, json!({}), &policy)
            .await
            .unwrap_err();
        assert!(matches!(err, RouteError::Handler { ref domain, .. } if domain.as_str() == "permits"));
        assert_eq!(handler.calls_to("permits"), 3);
    }

    #[tokio::test]
    async fn test_resolution_path_is_echoed() {
        let router = router(Arc::new(ScriptedHandler::default()));
        let classification = router.classify("I need a permit for a street party");
        let routed = router.route(&classification, json!({})).await.unwrap();
        assert_eq!(routed.domain.as_str(), "permits");
        assert_eq!(routed.resolution_path, ResolutionPath::Documents);
    }

    #[tokio::test]
    async fn test_dispatch_to_has_no_fallback() {
        let handler = Arc::new(ScriptedHandler::failing(&["parking"]));
        let router = router(handler.clone());
        let parking = DomainId::new("parking");
        for _ in 0..5 {
            let _ = router.dispatch_to(&parking, json!({})).await;
        }
        let err = router.dispatch_to(&parking, json!({})).await.unwrap_err();
        assert!(matches!(err, RouteError::AllHandlersUnavailable { .. }));
        assert_eq!(handler.calls_to("general"), 0);

        let err = router
            .dispatch_to(&DomainId::new("zoning"), json!({}))
            .await
            .unwrap_err();
        assert_eq!(err, RouteError::UnknownDomain(DomainId::new("zoning")));
    }

    #[tokio::test]
    async fn test_unregistered_candidate_is_unknown() {
        let router = router(Arc::new(ScriptedHandler::default()));
        let err = router
            .route(&ClassificationResult::single(DomainId::new("zoning")), json!({}))
            .await
            .unwrap_err();
        assert_eq!(err, RouteError::UnknownDomain(DomainId::new("zoning")));
    }

    #[tokio::test]
    async fn test_dispatch_timeout_counts_as_handler_failure() {
        let router = router_with(
            Arc::new(SlowHandler {
                delay: Some(Duration::from_millis(500)),
            }),
            clock(),
        )
        .with_dispatch_timeout(Duration::from_millis(20));
        let permits = DomainId::new("permits");

        let err = router
            .route(&ClassificationResult::single(permits.clone()), json!({}))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RouteError::Handler { ref domain, error: HandlerError::Timeout(t) }
                if domain == &permits && t == Duration::from_millis(20)
        ));
        assert!(err.is_retryable());

        let record = router.monitor().record(&permits);
        assert_eq!(record.consecutive_failures, 1);
        assert_eq!(record.state, CircuitState::Closed);

        assert_eq!(
            OrchestrationError::from(err),
            OrchestrationError::HandlerTimeout {
                domain: permits,
                timeout: Duration::from_millis(20),
            }
        );
    }

    #[tokio::test]
    async fn test_aborted_trial_dispatch_releases_trial() {
        let clock = clock();
        let router = Arc::new(router_with(Arc::new(SlowHandler { delay: None }), clock.clone()));
        let parking = DomainId::new("parking");
        let refused = HandlerError::Transport("connection refused".to_string());
        for _ in 0..5 {
            router.monitor().record_failure(&parking, &refused);
        }
        assert_eq!(router.monitor().state(&parking), CircuitState::Open);
        clock.advance(Duration::from_secs(31));

        let task = {
            let router = Arc::clone(&router);
            let classification = ClassificationResult::single(parking.clone());
            tokio::spawn(async move { router.route(&classification, json!({})).await })
        };
        while router.monitor().state(&parking) != CircuitState::HalfOpen {
            tokio::task::yield_now().await;
        }
        assert!(!router.monitor().is_available(&parking));

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());

        clock.advance(Duration::from_secs(24 * 3600));
        assert!(router.monitor().is_available(&parking));
        assert_eq!(router.monitor().admit(&parking), Admission::Trial);
    }

    #[tokio::test]
    async fn test_unused_selection_releases_trial() {
        let clock = clock();
        let router = router_with(Arc::new(ScriptedHandler::default()), clock.clone());
        let parking = DomainId::new("parking");
        let refused = HandlerError::Transport("connection refused".to_string());
        for _ in 0..5 {
            router.monitor().record_failure(&parking, &refused);
        }
        clock.advance(Duration::from_secs(31));

        let snapshot = router.registry().snapshot();
        let classification = ClassificationResult::single(parking.clone());
        let selection = router.select(&classification, &snapshot).unwrap();
        assert_eq!(selection.descriptor.id, parking);
        assert_eq!(selection.permit.admission(), Admission::Trial);
        drop(selection);

        let routed = router.route(&classification, json!({})).await.unwrap();
        assert_eq!(routed.domain, parking);
        assert_eq!(router.monitor().state(&parking), CircuitState::Closed);
    }
}
