//! Logging infrastructure: the orchestration event log.
//!
//! Provides [`JsonlEventLogger`], a JSONL file writer that implements the
//! [`EventLogger`](civic_application::EventLogger) port.

mod jsonl_event_logger;

pub use jsonl_event_logger::JsonlEventLogger;
