//! Health Monitor
//!
//! Owns one circuit breaker per domain. Each breaker sits behind its own
//! lock, so failures on one domain never contend with traffic to another.
//! Request outcomes (reported by the router) and active probes feed the same
//! state machine.

use crate::ports::clock::Clock;
use crate::ports::domain_handler::{DomainHandler, HandlerError};
use crate::ports::event_logger::{EventLogger, OrchestrationEvent};
use crate::use_cases::domain_registry::DomainRegistry;
use chrono::{DateTime, Utc};
use civic_domain::{
    Admission, CircuitBreakerPolicy, CircuitState, DomainDescriptor, DomainError, DomainId,
    HealthRecord, HealthTransition, ResolutionPath,
};
use dashmap::DashMap;
use futures::future::join_all;
use serde::Serialize;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Result of probing one domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum ProbeOutcome {
    Healthy,
    Unhealthy(String),
    /// The breaker did not admit a probe (open, or trial already in flight)
    Skipped,
}

/// Health view of one registered domain.
#[derive(Debug, Clone, Serialize)]
pub struct DomainHealth {
    pub id: DomainId,
    pub display_name: String,
    pub resolution_path: ResolutionPath,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_probe_time: Option<DateTime<Utc>>,
    pub last_failure: Option<String>,
    pub available: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSummary {
    pub total: usize,
    pub available: usize,
    pub unavailable: usize,
    pub availability_pct: f64,
}

/// Every registered domain with its breaker state.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryOverview {
    pub domains: Vec<DomainHealth>,
    pub summary: HealthSummary,
}

/// An admission held for the length of one request.
///
/// Report the outcome with [`succeeded`](Self::succeeded) or
/// [`failed`](Self::failed). A half-open trial dropped without an outcome
/// (the request future was cancelled or aborted) is handed back to the
/// breaker so the domain is not left waiting on a trial that never ends.
#[must_use]
pub struct AdmissionPermit<'a> {
    monitor: &'a HealthMonitor,
    id: DomainId,
    admission: Admission,
    settled: bool,
}

impl AdmissionPermit<'_> {
    pub fn domain(&self) -> &DomainId {
        &self.id
    }

    pub fn admission(&self) -> Admission {
        self.admission
    }

    pub fn succeeded(mut self) {
        self.settled = true;
        self.monitor.record_success(&self.id);
    }

    pub fn failed(mut self, error: &HandlerError) {
        self.settled = true;
        self.monitor.record_failure(&self.id, error);
    }
}

impl Drop for AdmissionPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.admission == Admission::Trial {
            warn!(domain = %self.id, "Trial request dropped without an outcome, releasing trial");
            self.monitor.with_record(&self.id, |r| r.release_trial());
        }
    }
}

impl std::fmt::Debug for AdmissionPermit<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionPermit")
            .field("id", &self.id)
            .field("admission", &self.admission)
            .field("settled", &self.settled)
            .finish()
    }
}

pub struct HealthMonitor {
    registry: Arc<DomainRegistry>,
    handler: Arc<dyn DomainHandler>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventLogger>,
    policy: CircuitBreakerPolicy,
    probe_interval: Duration,
    probe_timeout: Duration,
    records: DashMap<DomainId, Arc<Mutex<HealthRecord>>>,
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<DomainRegistry>,
        handler: Arc<dyn DomainHandler>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventLogger>,
        policy: CircuitBreakerPolicy,
    ) -> Self {
        Self {
            registry,
            handler,
            clock,
            events,
            policy,
            probe_interval: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(5),
            records: DashMap::new(),
        }
    }

    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn policy(&self) -> &CircuitBreakerPolicy {
        &self.policy
    }

    fn record_for(&self, id: &DomainId) -> Arc<Mutex<HealthRecord>> {
        self.records
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(HealthRecord::new(&self.policy))))
            .clone()
    }

    /// Run `f` with the domain's record locked. The lock is never held
    /// across an await point.
    fn with_record<T>(&self, id: &DomainId, f: impl FnOnce(&mut HealthRecord) -> T) -> T {
        let record = self.record_for(id);
        let mut guard = record.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    fn publish(&self, id: &DomainId, transition: HealthTransition) {
        match transition.to {
            CircuitState::Open => warn!(
                domain = %id,
                from = %transition.from,
                reason = %transition.reason,
                cooldown_ms = transition.cooldown_ms,
                "Circuit opened"
            ),
            _ => info!(
                domain = %id,
                from = %transition.from,
                to = %transition.to,
                reason = %transition.reason,
                "Circuit transition"
            ),
        }
        self.events.log(OrchestrationEvent::new(
            "circuit_transition",
            transition.at,
            json!({
                "domain": id,
                "from": transition.from,
                "to": transition.to,
                "reason": transition.reason.to_string(),
                "detail": transition.reason,
                "consecutive_failures": transition.consecutive_failures,
                "cooldown_ms": transition.cooldown_ms,
            }),
        ));
    }

    /// Ask the breaker whether a request may go to `id`. An admission after
    /// the cooldown claims the single half-open trial.
    pub fn admit(&self, id: &DomainId) -> Admission {
        let now = self.clock.now();
        let (admission, transition) = self.with_record(id, |r| r.admit(now));
        if let Some(t) = transition {
            self.publish(id, t);
        }
        admission
    }

    /// Like [`admit`](Self::admit), but the admission is held in a permit
    /// that reports the outcome. Returns the rejection when not admitted.
    pub fn claim(&self, id: &DomainId) -> Result<AdmissionPermit<'_>, Admission> {
        let admission = self.admit(id);
        if !admission.is_admitted() {
            return Err(admission);
        }
        Ok(AdmissionPermit {
            monitor: self,
            id: id.clone(),
            admission,
            settled: false,
        })
    }

    /// Whether a request would currently be admitted, without claiming a trial.
    pub fn is_available(&self, id: &DomainId) -> bool {
        let now = self.clock.now();
        self.with_record(id, |r| r.is_available(now))
    }

    pub fn state(&self, id: &DomainId) -> CircuitState {
        self.with_record(id, |r| r.state)
    }

    pub fn record(&self, id: &DomainId) -> HealthRecord {
        self.with_record(id, |r| r.clone())
    }

    pub fn record_success(&self, id: &DomainId) {
        let now = self.clock.now();
        let policy = self.policy;
        if let Some(t) = self.with_record(id, |r| r.record_success(&policy, now)) {
            self.publish(id, t);
        }
    }

    pub fn record_failure(&self, id: &DomainId, error: &HandlerError) {
        let now = self.clock.now();
        let policy = self.policy;
        let message = error.to_string();
        let (transition, failures) = self.with_record(id, |r| {
            let t = r.record_failure(&policy, now, &message);
            (t, r.consecutive_failures)
        });
        debug!(domain = %id, failures, error = %message, "Handler failure recorded");
        if let Some(t) = transition {
            self.publish(id, t);
        }
    }

    /// Register a domain with a fresh breaker.
    pub fn register_domain(&self, descriptor: DomainDescriptor) -> Result<(), DomainError> {
        let id = descriptor.id.clone();
        self.registry.register(descriptor)?;
        self.records.remove(&id);
        Ok(())
    }

    /// Deregister a domain and drop its breaker, so a later registration
    /// under the same id starts closed.
    pub fn deregister_domain(&self, id: &DomainId) -> Result<(), DomainError> {
        self.registry.deregister(id)?;
        self.records.remove(id);
        debug!(domain = %id, "Health record dropped");
        Ok(())
    }

    /// Probe one domain, unless its breaker refuses admission.
    pub async fn probe_domain(&self, descriptor: &DomainDescriptor) -> ProbeOutcome {
        let id = &descriptor.id;
        let Ok(permit) = self.claim(id) else {
            debug!(domain = %id, "Probe skipped, circuit not admitting");
            return ProbeOutcome::Skipped;
        };

        let result = match tokio::time::timeout(
            self.probe_timeout,
            self.handler.probe(descriptor, self.probe_timeout),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(HandlerError::Timeout(self.probe_timeout)),
        };

        let now = self.clock.now();
        self.with_record(id, |r| r.mark_probed(now));
        match result {
            Ok(()) => {
                permit.succeeded();
                ProbeOutcome::Healthy
            }
            Err(e) => {
                permit.failed(&e);
                ProbeOutcome::Unhealthy(e.to_string())
            }
        }
    }

    /// Probe every registered domain once, concurrently.
    pub async fn probe_all(&self) -> Vec<(DomainId, ProbeOutcome)> {
        let snapshot = self.registry.snapshot();
        let probes = snapshot.all().iter().map(|descriptor| async move {
            (descriptor.id.clone(), self.probe_domain(descriptor).await)
        });
        join_all(probes).await
    }

    /// Start the periodic probe loop. It stops when `cancel` fires.
    pub fn spawn_probe_loop(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(monitor.probe_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            info!(interval_ms = monitor.probe_interval.as_millis() as u64, "Probe loop started");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Probe loop stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        let results = monitor.probe_all().await;
                        let unhealthy = results
                            .iter()
                            .filter(|(_, o)| matches!(o, ProbeOutcome::Unhealthy(_)))
                            .count();
                        debug!(probed = results.len(), unhealthy, "Probe round finished");
                    }
                }
            }
        })
    }

    /// Registry listing with breaker state and an availability summary.
    pub fn overview(&self) -> RegistryOverview {
        let now = self.clock.now();
        let snapshot = self.registry.snapshot();
        let domains: Vec<DomainHealth> = snapshot
            .all()
            .iter()
            .map(|d| {
                let record = self.record(&d.id);
                DomainHealth {
                    id: d.id.clone(),
                    display_name: d.display_name.clone(),
                    resolution_path: d.resolution_path,
                    state: record.state,
                    consecutive_failures: record.consecutive_failures,
                    last_probe_time: record.last_probe_time,
                    available: record.is_available(now),
                    last_failure: record.last_failure,
                }
            })
            .collect();
        let total = domains.len();
        let available = domains.iter().filter(|d| d.available).count();
        let availability_pct = if total == 0 {
            0.0
        } else {
            (available as f64 / total as f64 * 1000.0).round() / 10.0
        };
        RegistryOverview {
            summary: HealthSummary {
                total,
                available,
                unavailable: total - available,
                availability_pct,
            },
            domains,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::clock::ManualClock;
    use crate::ports::event_logger::NoEventLogger;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use civic_domain::{Endpoint, Signature};
    use serde_json::Value;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Probes fail for domains in `down`; counts every probe.
    struct ProbeHandler {
        down: Mutex<HashSet<String>>,
        probes: AtomicUsize,
    }

    impl ProbeHandler {
        fn new(down: &[&str]) -> Self {
            Self {
                down: Mutex::new(down.iter().map(|s| s.to_string()).collect()),
                probes: AtomicUsize::new(0),
            }
        }

        fn recover(&self, id: &str) {
            self.down.lock().unwrap().remove(id);
        }
    }

    #[async_trait]
    impl DomainHandler for ProbeHandler {
        async fn invoke(
            &self,
            _domain: &DomainDescriptor,
            payload: Value,
            _timeout: Duration,
        ) -> Result<Value, HandlerError> {
            Ok(payload)
        }

        async fn probe(&self, domain: &DomainDescriptor, _timeout: Duration) -> Result<(), HandlerError> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            if self.down.lock().unwrap().contains(domain.id.as_str()) {
                Err(HandlerError::Transport("connection refused".to_string()))
            } else {
                Ok(())
            }
        }
    }

    /// Collects events for assertions.
    #[derive(Default)]
    struct RecordingLogger {
        events: Mutex<Vec<OrchestrationEvent>>,
    }

    impl EventLogger for RecordingLogger {
        fn log(&self, event: OrchestrationEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap()
    }

    fn registry() -> Arc<DomainRegistry> {
        Arc::new(
            DomainRegistry::with_domains(["parking", "permits"].map(|id| {
                DomainDescriptor::new(id, Signature::keywords([id]), Endpoint::new("http://x"))
            }))
            .unwrap(),
        )
    }

    fn monitor(
        handler: Arc<ProbeHandler>,
        clock: Arc<ManualClock>,
        events: Arc<dyn EventLogger>,
    ) -> HealthMonitor {
        HealthMonitor::new(registry(), handler, clock, events, CircuitBreakerPolicy::default())
    }

    #[test]
    fn test_threshold_failures_open_circuit() {
        let clock = Arc::new(ManualClock::new(t0()));
        let logger = Arc::new(RecordingLogger::default());
        let monitor = monitor(Arc::new(ProbeHandler::new(&[])), clock, logger.clone());
        let parking = DomainId::new("parking");
        let error = HandlerError::Timeout(Duration::from_secs(30));

        for _ in 0..5 {
            assert_eq!(monitor.admit(&parking), Admission::Allowed);
            monitor.record_failure(&parking, &error);
        }
        assert_eq!(monitor.state(&parking), CircuitState::Open);
        assert!(!monitor.admit(&parking).is_admitted());
        // Other domains unaffected
        assert_eq!(monitor.state(&DomainId::new("permits")), CircuitState::Closed);

        let events = logger.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "circuit_transition");
        assert_eq!(events[0].payload["to"], "open");
        assert_eq!(events[0].payload["domain"], "parking");
    }

    #[test]
    fn test_half_open_trial_and_recovery() {
        let clock = Arc::new(ManualClock::new(t0()));
        let monitor = monitor(
            Arc::new(ProbeHandler::new(&[])),
            clock.clone(),
            Arc::new(NoEventLogger),
        );
        let parking = DomainId::new("parking");
        let error = HandlerError::Rejected("500".to_string());
        for _ in 0..5 {
            monitor.record_failure(&parking, &error);
        }

        clock.advance(Duration::from_secs(30));
        assert!(monitor.is_available(&parking));
        assert_eq!(monitor.admit(&parking), Admission::Trial);
        assert_eq!(monitor.state(&parking), CircuitState::HalfOpen);
        assert!(!monitor.admit(&parking).is_admitted());

        monitor.record_success(&parking);
        assert_eq!(monitor.state(&parking), CircuitState::Closed);
        assert_eq!(monitor.record(&parking).consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_probe_failures_count_like_request_failures() {
        let clock = Arc::new(ManualClock::new(t0()));
        let handler = Arc::new(ProbeHandler::new(&["parking"]));
        let monitor = monitor(handler.clone(), clock, Arc::new(NoEventLogger));

        for _ in 0..5 {
            monitor.probe_all().await;
        }
        assert_eq!(monitor.state(&DomainId::new("parking")), CircuitState::Open);
        assert_eq!(monitor.state(&DomainId::new("permits")), CircuitState::Closed);
        assert_eq!(handler.probes.load(Ordering::SeqCst), 10);

        // Open breaker: probes are skipped until cooldown
        let results = monitor.probe_all().await;
        assert!(results.contains(&(DomainId::new("parking"), ProbeOutcome::Skipped)));
        assert_eq!(handler.probes.load(Ordering::SeqCst), 11);
    }

    #[tokio::test]
    async fn test_probe_closes_after_cooldown_when_healthy() {
        let clock = Arc::new(ManualClock::new(t0()));
        let handler = Arc::new(ProbeHandler::new(&["parking"]));
        let monitor = monitor(handler.clone(), clock.clone(), Arc::new(NoEventLogger));
        let parking = registry().lookup(&DomainId::new("parking")).unwrap();

        for _ in 0..5 {
            monitor.probe_domain(&parking).await;
        }
        handler.recover("parking");
        clock.advance(Duration::from_secs(31));
        assert_eq!(monitor.probe_domain(&parking).await, ProbeOutcome::Healthy);
        assert_eq!(monitor.state(&parking.id), CircuitState::Closed);
        assert!(monitor.record(&parking.id).last_probe_time.is_some());
    }

    #[test]
    fn test_overview_summary() {
        let clock = Arc::new(ManualClock::new(t0()));
        let monitor = monitor(Arc::new(ProbeHandler::new(&[])), clock, Arc::new(NoEventLogger));
        let error = HandlerError::Transport("down".to_string());
        for _ in 0..5 {
            monitor.record_failure(&DomainId::new("permits"), &error);
        }
        let overview = monitor.overview();
        assert_eq!(overview.summary.total, 2);
        assert_eq!(overview.summary.available, 1);
        assert_eq!(overview.summary.unavailable, 1);
        assert_eq!(overview.summary.availability_pct, 50.0);
        assert_eq!(overview.domains[1].state, CircuitState::Open);
        assert_eq!(overview.domains[1].last_failure.as_deref(), Some("Transport error: down"));
    }

    #[tokio::test]
    async fn test_probe_loop_stops_on_cancel() {
        let clock = Arc::new(ManualClock::new(t0()));
        let handler = Arc::new(ProbeHandler::new(&[]));
        let monitor = Arc::new(
            monitor(handler.clone(), clock, Arc::new(NoEventLogger))
                .with_probe_interval(Duration::from_millis(10)),
        );
        let cancel = CancellationToken::new();
        let task = monitor.spawn_probe_loop(cancel.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        task.await.unwrap();
        assert!(handler.probes.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn test_reregistered_domain_starts_closed() {
        let clock = Arc::new(ManualClock::new(t0()));
        let monitor = monitor(Arc::new(ProbeHandler::new(&[])), clock, Arc::new(NoEventLogger));
        let parking = DomainId::new("parking");
        let error = HandlerError::Transport("down".to_string());
        for _ in 0..5 {
            monitor.record_failure(&parking, &error);
        }
        assert_eq!(monitor.state(&parking), CircuitState::Open);

        monitor.deregister_domain(&parking).unwrap();
        assert!(!monitor.records.contains_key(&parking));
        assert_eq!(monitor.overview().summary.total, 1);

        monitor
            .register_domain(DomainDescriptor::new(
                "parking",
                Signature::keywords(["parking"]),
                Endpoint::new("http://x"),
            ))
            .unwrap();
        assert_eq!(monitor.state(&parking), CircuitState::Closed);
        assert_eq!(monitor.record(&parking).consecutive_failures, 0);
        assert_eq!(monitor.admit(&parking), Admission::Allowed);

        assert_eq!(
            monitor.deregister_domain(&DomainId::new("zoning")),
            Err(DomainError::NotFound("zoning".to_string()))
        );
    }
}
