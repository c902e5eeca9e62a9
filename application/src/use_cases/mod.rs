//! Use cases
//!
//! Application-level operations that orchestrate domain logic.

pub mod domain_registry;
pub mod health_monitor;
pub mod router;
pub mod submit_issue;
pub mod workflow_engine;
