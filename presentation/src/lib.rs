//! Presentation layer for civicmind
//!
//! This crate contains CLI definitions, output formatters
//! and workflow progress reporters.

pub mod cli;
pub mod config;
pub mod output;
pub mod progress;

// Re-export commonly used types
pub use cli::commands::{Cli, Command, OutputFormatArg, WorkflowCommand};
pub use config::OutputConfig;
pub use output::console::ConsoleFormatter;
pub use output::formatter::{JsonFormatter, OutputFormatter, formatter_for};
pub use progress::reporter::{SimpleProgress, WorkflowProgressReporter};
