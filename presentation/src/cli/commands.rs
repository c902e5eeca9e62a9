//! CLI command definitions

use civic_domain::{OutputFormat, Priority};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Output format flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormatArg {
    /// Human-readable text
    Text,
    /// JSON output
    Json,
}

impl From<OutputFormatArg> for OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Text => OutputFormat::Text,
            OutputFormatArg::Json => OutputFormat::Json,
        }
    }
}

/// CLI arguments for civicmind
#[derive(Parser, Debug)]
#[command(name = "civicmind")]
#[command(author, version, about = "Route civic issue reports to the right city service")]
#[command(long_about = r#"
civicmind classifies free-text civic issue reports, routes them to the best
available domain handler (parking, permits, noise...) and runs multi-step
workflows across several domains with compensation on failure.

Configuration files are loaded from (lowest to highest priority):
1. ~/.config/civicmind/config.toml   Global config
2. ./civicmind.toml                  Project-level config
3. --config <path>                   Explicit config file
4. CIVICMIND_<SECTION>__<KEY>        Environment variables

Example:
  civicmind classify "Someone keeps parking in my driveway"
  civicmind submit "Loud music every night" --location "5th Ave" --priority high
  civicmind workflow start open_restaurant --input '{"name":"Luna","address":"12 Main St"}'
"#)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Verbosity level (-v = info, -vv = debug, -vvv = trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Output format (overrides the config file)
    #[arg(short, long, value_enum, global = true)]
    pub output: Option<OutputFormatArg>,

    /// Suppress progress indicators
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Use the in-process loopback handler and an in-memory store
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Path to configuration file
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Disable loading of configuration files
    #[arg(long, global = true)]
    pub no_config: bool,

    /// Show configuration file locations and exit
    #[arg(long)]
    pub show_config: bool,
}

impl Cli {
    pub fn output_format(&self) -> Option<OutputFormat> {
        self.output.map(OutputFormat::from)
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Rank domains for an issue description without dispatching it
    Classify {
        /// Issue description
        text: String,
    },

    /// Classify an issue and route it to the best available handler
    Submit {
        /// Issue description
        text: String,

        /// Where the issue is
        #[arg(short, long)]
        location: Option<String>,

        /// low, medium, high or urgent
        #[arg(short, long, default_value = "medium")]
        priority: Priority,
    },

    /// List registered domains with their circuit state
    Domains,

    /// Probe every domain once, then show the overview
    Health,

    /// Multi-domain workflows
    #[command(subcommand)]
    Workflow(WorkflowCommand),
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum WorkflowCommand {
    /// List registered workflow types
    Types,

    /// Start a workflow and wait for it to finish
    Start {
        /// Workflow type, e.g. open_restaurant
        workflow_type: String,

        /// Workflow input as a JSON object
        #[arg(short, long, value_name = "JSON", default_value = "{}")]
        input: String,

        /// Persist the instance and return without driving it
        #[arg(short, long)]
        detach: bool,
    },

    /// Show the persisted state of an instance
    Status {
        /// Instance id
        id: String,
    },

    /// Cancel an instance and compensate its completed steps
    Cancel {
        /// Instance id
        id: String,
    },

    /// Resume every unfinished instance whose lease is free
    Resume,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_submit_with_globals() {
        let cli = Cli::try_parse_from([
            "civicmind",
            "submit",
            "Loud music every night",
            "--priority",
            "urgent",
            "-o",
            "json",
            "--dry-run",
        ])
        .unwrap();
        assert!(cli.dry_run);
        assert_eq!(cli.output_format(), Some(OutputFormat::Json));
        assert_eq!(
            cli.command,
            Some(Command::Submit {
                text: "Loud music every night".into(),
                location: None,
                priority: Priority::Urgent,
            })
        );
    }

    #[test]
    fn test_parse_workflow_start() {
        let cli = Cli::try_parse_from([
            "civicmind",
            "workflow",
            "start",
            "open_restaurant",
            "--input",
            r#"{"name":"Luna"}"#,
            "--detach",
        ])
        .unwrap();
        assert_eq!(cli.output_format(), None);
        match cli.command {
            Some(Command::Workflow(WorkflowCommand::Start {
                workflow_type,
                input,
                detach,
            })) => {
                assert_eq!(workflow_type, "open_restaurant");
                assert_eq!(input, r#"{"name":"Luna"}"#);
                assert!(detach);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_invalid_priority_rejected() {
        assert!(Cli::try_parse_from(["civicmind", "submit", "text here!", "-p", "soon"]).is_err());
    }
}
