//! Port for the orchestration event log.
//!
//! Defines the [`EventLogger`] trait for recording state transitions
//! (circuit-breaker changes, workflow and step status changes) to a
//! structured audit log.
//!
//! This is separate from `tracing`-based operation logs: tracing handles
//! human-readable diagnostic messages, while this port captures every
//! transition with its timestamp and reason in a machine-readable format
//! (JSONL).

use chrono::{DateTime, Utc};
use serde_json::Value;

/// A structured orchestration event.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestrationEvent {
    /// Event type identifier (e.g., "circuit_transition", "step_status").
    pub event_type: &'static str,
    pub at: DateTime<Utc>,
    /// JSON payload with event-specific data, including the reason.
    pub payload: Value,
}

impl OrchestrationEvent {
    pub fn new(event_type: &'static str, at: DateTime<Utc>, payload: Value) -> Self {
        Self {
            event_type,
            at,
            payload,
        }
    }
}

/// Port for logging orchestration events.
///
/// `log` is synchronous and non-fallible so a broken log sink never
/// interrupts routing or workflow execution.
pub trait EventLogger: Send + Sync {
    fn log(&self, event: OrchestrationEvent);
}

/// No-op implementation for tests and when the event log is disabled.
pub struct NoEventLogger;

impl EventLogger for NoEventLogger {
    fn log(&self, _event: OrchestrationEvent) {}
}
