//! Workflow progress display

pub mod reporter;
