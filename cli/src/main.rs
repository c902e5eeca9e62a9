//! CLI entrypoint for civicmind
//!
//! This is the main binary that wires together all layers using
//! dependency injection.

use anyhow::{Context, Result, bail};
use civic_application::{
    Clock, DomainHandler, DomainRegistry, EventLogger, HealthMonitor, InMemoryWorkflowStore,
    NoEventLogger, NoWorkflowProgress, OrchestrationError, OrchestrationParams, Router,
    SubmitIssueInput, SubmitIssueUseCase, SystemClock, WorkflowEngine, WorkflowProgressNotifier,
    WorkflowStore,
};
use civic_domain::{Classifier, InstanceId};
use civic_infrastructure::{
    ConfigLoader, FileConfig, FileWorkflowStore, JsonlEventLogger, LoopbackDomainHandler,
};
use civic_presentation::{
    Cli, Command, OutputConfig, OutputFormatter, WorkflowCommand, WorkflowProgressReporter,
    formatter_for,
};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Everything a command needs, built once from the configuration.
struct App {
    router: Arc<Router>,
    monitor: Arc<HealthMonitor>,
    engine: Arc<WorkflowEngine>,
    submit: SubmitIssueUseCase,
    output: OutputConfig,
    formatter: Box<dyn OutputFormatter>,
}

fn init_tracing(verbose: u8, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // RUST_LOG wins over -v
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"), // -vvv or more
    });

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "civicmind.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(file_layer)
        .init();

    guard
}

fn load_config(cli: &Cli) -> Result<FileConfig> {
    let config = if cli.no_config {
        ConfigLoader::load_defaults()
    } else {
        ConfigLoader::load(cli.config.as_ref())
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?
    };

    let issues = config.validate();
    if !issues.is_empty() {
        for issue in &issues {
            eprintln!("config: {}", issue);
        }
        bail!("Invalid configuration ({} issue(s))", issues.len());
    }
    Ok(config)
}

fn build_handler(dry_run: bool) -> Result<Arc<dyn DomainHandler>> {
    if dry_run {
        info!("Dry run: using the loopback handler");
        return Ok(Arc::new(LoopbackDomainHandler::new()));
    }
    #[cfg(feature = "http-handlers")]
    {
        Ok(Arc::new(civic_infrastructure::HttpDomainHandler::new()?))
    }
    #[cfg(not(feature = "http-handlers"))]
    {
        bail!("Built without the http-handlers feature; use --dry-run")
    }
}

fn build_store(config: &FileConfig, dry_run: bool) -> Result<Arc<dyn WorkflowStore>> {
    if dry_run {
        return Ok(Arc::new(InMemoryWorkflowStore::new()));
    }
    let dir = config.workflow.resolved_state_dir();
    let store = FileWorkflowStore::open(&dir)
        .with_context(|| format!("Failed to open workflow store at {}", dir.display()))?;
    info!(state_dir = %dir.display(), "Workflow store opened");
    Ok(Arc::new(store))
}

fn build_app(cli: &Cli, config: &FileConfig) -> Result<App> {
    let params: OrchestrationParams = config.to_params();
    let output = OutputConfig::resolve(
        cli.output_format(),
        config.output.format,
        config.output.color,
        config.output.show_progress,
        cli.quiet,
    );
    if !output.color {
        colored::control::set_override(false);
    }

    let events: Arc<dyn EventLogger> = match &config.logging.event_log {
        Some(path) => match JsonlEventLogger::new(path) {
            Some(logger) => Arc::new(logger),
            None => {
                warn!(path = %path.display(), "Event log disabled");
                Arc::new(NoEventLogger)
            }
        },
        None => Arc::new(NoEventLogger),
    };
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // === Dependency Injection ===
    let registry = Arc::new(DomainRegistry::with_domains(config.domain_catalogue())?);
    let handler = build_handler(cli.dry_run)?;
    let monitor = Arc::new(
        HealthMonitor::new(
            Arc::clone(&registry),
            Arc::clone(&handler),
            Arc::clone(&clock),
            Arc::clone(&events),
            params.circuit,
        )
        .with_probe_interval(params.probe_interval)
        .with_probe_timeout(params.probe_timeout),
    );
    let classifier = Arc::new(Classifier::with_default_scorer(params.classifier.clone()));
    let router = Arc::new(
        Router::new(registry, classifier, Arc::clone(&monitor), handler)
            .with_dispatch_timeout(params.dispatch_timeout),
    );

    let progress: Arc<dyn WorkflowProgressNotifier> = if output.show_progress {
        Arc::new(WorkflowProgressReporter::new())
    } else {
        Arc::new(NoWorkflowProgress)
    };
    let engine = WorkflowEngine::new(
        Arc::clone(&router),
        build_store(config, cli.dry_run)?,
        clock,
        &params,
    )
    .with_event_logger(Arc::clone(&events))
    .with_progress(progress)
    .with_definitions(config.workflow_catalogue())?;

    let submit = SubmitIssueUseCase::new(Arc::clone(&router), params.retry).with_event_logger(events);

    Ok(App {
        router,
        monitor,
        engine: Arc::new(engine),
        submit,
        output,
        formatter: formatter_for(output.format),
    })
}

async fn run_workflow_command(app: &App, command: WorkflowCommand) -> Result<()> {
    let engine = &app.engine;
    match command {
        WorkflowCommand::Types => {
            println!("{}", app.formatter.format_workflow_types(&engine.list_workflow_types()));
        }
        WorkflowCommand::Start {
            workflow_type,
            input,
            detach,
        } => {
            let input: serde_json::Value =
                serde_json::from_str(&input).context("--input must be valid JSON")?;
            let instance = engine.create_workflow(&workflow_type, input).await?;
            if detach {
                println!("{}", app.formatter.format_instance(&instance));
                return Ok(());
            }

            let probes = CancellationToken::new();
            let probe_loop = app.monitor.spawn_probe_loop(probes.clone());

            let id = instance.instance_id.clone();
            let mut driver = {
                let engine = Arc::clone(engine);
                let id = id.clone();
                tokio::spawn(async move { engine.drive_instance(&id).await })
            };

            let finished = tokio::select! {
                joined = &mut driver => joined,
                _ = tokio::signal::ctrl_c() => {
                    warn!(instance_id = %id, "Interrupted, cancelling workflow");
                    if let Err(e) = engine.cancel_workflow(&id).await {
                        error!(instance_id = %id, error = %e, "Cancel failed");
                    }
                    driver.await
                }
            };
            probes.cancel();
            let _ = probe_loop.await;

            let instance = finished.context("Workflow driver panicked")??;
            println!("{}", app.formatter.format_instance(&instance));
            if let Some(err) = OrchestrationError::from_instance(&instance) {
                bail!(err);
            }
        }
        WorkflowCommand::Status { id } => {
            let instance = engine.get_status(&InstanceId::new(id)).await?;
            println!("{}", app.formatter.format_instance(&instance));
        }
        WorkflowCommand::Cancel { id } => {
            let instance = engine.cancel_workflow(&InstanceId::new(id)).await?;
            println!("{}", app.formatter.format_instance(&instance));
        }
        WorkflowCommand::Resume => {
            let outcomes = engine.recover().await?;
            println!("{}", app.formatter.format_recovery(&outcomes));
            if outcomes.iter().any(|o| o.error.is_some()) {
                bail!("Some workflow instances could not be resumed");
            }
        }
    }
    Ok(())
}

async fn run(app: &App, command: Command) -> Result<()> {
    match command {
        Command::Classify { text } => {
            let result = app.submit.classify(&text);
            println!("{}", app.formatter.format_classification(&text, &result));
        }
        Command::Submit {
            text,
            location,
            priority,
        } => {
            let mut input = SubmitIssueInput::new(text).with_priority(priority);
            if let Some(location) = location {
                input = input.with_location(location);
            }
            let routed = app.submit.execute(input).await?;
            println!("{}", app.formatter.format_routed(&routed));
        }
        Command::Domains => {
            println!("{}", app.formatter.format_overview(&app.monitor.overview()));
        }
        Command::Health => {
            let probes = app.monitor.probe_all().await;
            println!(
                "{}",
                app.formatter.format_probes(&probes, &app.monitor.overview())
            );
        }
        Command::Workflow(command) => run_workflow_command(app, command).await?,
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.show_config {
        ConfigLoader::print_config_sources(cli.config.as_ref());
        return Ok(());
    }

    let config = load_config(&cli)?;
    let _log_guard = init_tracing(cli.verbose, config.logging.log_dir.as_deref());
    info!("Starting civicmind");

    let Some(command) = cli.command.clone() else {
        bail!("No command given. Run `civicmind --help` for usage.");
    };

    let app = build_app(&cli, &config)?;
    info!(
        domains = app.router.registry().snapshot().len(),
        output = ?app.output.format,
        dry_run = cli.dry_run,
        "Ready"
    );
    run(&app, command).await
}
