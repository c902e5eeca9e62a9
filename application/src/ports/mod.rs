//! Port definitions (interfaces for external adapters)
//!
//! Ports define the contracts that infrastructure adapters must implement.

pub mod clock;
pub mod domain_handler;
pub mod event_logger;
pub mod progress;
pub mod workflow_store;
