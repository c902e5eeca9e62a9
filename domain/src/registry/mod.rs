//! Domain registry types
//!
//! Descriptors for the civic service domains known to the orchestrator and
//! the copy-on-write snapshot the registry hands out to readers.

pub mod descriptor;
pub mod signature;
pub mod snapshot;
