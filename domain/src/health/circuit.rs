//! Per-domain circuit breaker
//!
//! The breaker is a plain state machine driven by explicit timestamps, so the
//! health monitor decides *when* and the record decides *what*. Every method
//! that changes `state` returns the [`HealthTransition`] it performed so the
//! caller can log it.
//!
//! ```text
//!            failures >= threshold
//!   Closed ─────────────────────────▶ Open
//!     ▲                                │ cooldown elapsed,
//!     │ trial succeeded                │ first admission
//!     │                                ▼
//!     └──────────────────────────── HalfOpen ──trial failed──▶ Open (cooldown x2)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Requests pass through
    #[default]
    Closed,
    /// Requests are short-circuited
    Open,
    /// A single trial request is allowed
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerPolicy {
    pub failure_threshold: u32,
    pub cooldown: Duration,
    pub max_cooldown: Duration,
}

impl Default for CircuitBreakerPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
            max_cooldown: Duration::from_secs(300),
        }
    }
}

/// Outcome of asking the breaker whether a request may go through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    /// The single half-open trial; its outcome decides the next state
    Trial,
    /// Short-circuited. `retry_after` is unknown while a trial is in flight.
    Rejected { retry_after: Option<Duration> },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        !matches!(self, Admission::Rejected { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum TransitionReason {
    FailureThreshold { failures: u32 },
    CooldownElapsed,
    TrialSucceeded,
    TrialFailed { error: String },
}

impl std::fmt::Display for TransitionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransitionReason::FailureThreshold { failures } => {
                write!(f, "{} consecutive failures", failures)
            }
            TransitionReason::CooldownElapsed => write!(f, "cooldown elapsed"),
            TransitionReason::TrialSucceeded => write!(f, "trial request succeeded"),
            TransitionReason::TrialFailed { error } => write!(f, "trial request failed: {}", error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthTransition {
    pub from: CircuitState,
    pub to: CircuitState,
    pub reason: TransitionReason,
    pub at: DateTime<Utc>,
    pub consecutive_failures: u32,
    /// Cooldown in effect after the transition, in milliseconds
    pub cooldown_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthRecord {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_probe_time: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub current_cooldown: Duration,
    pub trial_in_flight: bool,
    pub last_failure: Option<String>,
}

impl HealthRecord {
    pub fn new(policy: &CircuitBreakerPolicy) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_probe_time: None,
            opened_at: None,
            current_cooldown: policy.cooldown,
            trial_in_flight: false,
            last_failure: None,
        }
    }

    fn transition(
        &mut self,
        to: CircuitState,
        reason: TransitionReason,
        now: DateTime<Utc>,
    ) -> HealthTransition {
        let from = self.state;
        self.state = to;
        HealthTransition {
            from,
            to,
            reason,
            at: now,
            consecutive_failures: self.consecutive_failures,
            cooldown_ms: self.current_cooldown.as_millis() as u64,
        }
    }

    /// Time left before an open breaker admits its trial.
    pub fn cooldown_remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        if self.state != CircuitState::Open {
            return None;
        }
        let opened_at = self.opened_at?;
        let elapsed = (now - opened_at).to_std().unwrap_or(Duration::ZERO);
        Some(self.current_cooldown.saturating_sub(elapsed))
    }

    /// Whether [`admit`](Self::admit) would let a request through, without
    /// claiming the half-open trial.
    pub fn is_available(&self, now: DateTime<Utc>) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => self.cooldown_remaining(now) == Some(Duration::ZERO),
            CircuitState::HalfOpen => !self.trial_in_flight,
        }
    }

    pub fn admit(&mut self, now: DateTime<Utc>) -> (Admission, Option<HealthTransition>) {
        match self.state {
            CircuitState::Closed => (Admission::Allowed, None),
            CircuitState::Open => match self.cooldown_remaining(now) {
                Some(remaining) if !remaining.is_zero() => (
                    Admission::Rejected {
                        retry_after: Some(remaining),
                    },
                    None,
                ),
                _ => {
                    self.trial_in_flight = true;
                    let t = self.transition(
                        CircuitState::HalfOpen,
                        TransitionReason::CooldownElapsed,
                        now,
                    );
                    (Admission::Trial, Some(t))
                }
            },
            CircuitState::HalfOpen => {
                if self.trial_in_flight {
                    (Admission::Rejected { retry_after: None }, None)
                } else {
                    self.trial_in_flight = true;
                    (Admission::Trial, None)
                }
            }
        }
    }

    pub fn record_success(
        &mut self,
        policy: &CircuitBreakerPolicy,
        now: DateTime<Utc>,
    ) -> Option<HealthTransition> {
        match self.state {
            CircuitState::Closed => {
                self.consecutive_failures = 0;
                self.last_failure = None;
                None
            }
            CircuitState::HalfOpen => {
                self.consecutive_failures = 0;
                self.last_failure = None;
                self.trial_in_flight = false;
                self.opened_at = None;
                self.current_cooldown = policy.cooldown;
                Some(self.transition(
                    CircuitState::Closed,
                    TransitionReason::TrialSucceeded,
                    now,
                ))
            }
            // Late result of a request admitted before the breaker opened
            CircuitState::Open => None,
        }
    }

    pub fn record_failure(
        &mut self,
        policy: &CircuitBreakerPolicy,
        now: DateTime<Utc>,
        error: &str,
    ) -> Option<HealthTransition> {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_failure = Some(error.to_string());
        match self.state {
            CircuitState::Closed if self.consecutive_failures >= policy.failure_threshold => {
                self.opened_at = Some(now);
                self.current_cooldown = policy.cooldown;
                Some(self.transition(
                    CircuitState::Open,
                    TransitionReason::FailureThreshold {
                        failures: self.consecutive_failures,
                    },
                    now,
                ))
            }
            CircuitState::HalfOpen => {
                self.trial_in_flight = false;
                self.opened_at = Some(now);
                self.current_cooldown = (self.current_cooldown * 2).min(policy.max_cooldown);
                Some(self.transition(
                    CircuitState::Open,
                    TransitionReason::TrialFailed {
                        error: error.to_string(),
                    },
                    now,
                ))
            }
            _ => None,
        }
    }

    pub fn mark_probed(&mut self, now: DateTime<Utc>) {
        self.last_probe_time = Some(now);
    }

    /// Hand back a half-open trial whose request ended without an outcome,
    /// so the next admission can claim it.
    pub fn release_trial(&mut self) {
        if self.state == CircuitState::HalfOpen {
            self.trial_in_flight = false;
        }
    }
}
