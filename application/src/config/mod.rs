//! Application-level configuration.
//!
//! - [`OrchestrationParams`]: thresholds, timeouts and limits for the
//!   orchestration services

pub mod orchestration_params;

pub use orchestration_params::OrchestrationParams;
