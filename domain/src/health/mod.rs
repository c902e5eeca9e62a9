//! Handler health tracking

pub mod circuit;

pub use circuit::{
    Admission, CircuitBreakerPolicy, CircuitState, HealthRecord, HealthTransition,
    TransitionReason,
};
