//! ETLRunner CLI Entry Point
//!
//! Provides command-line interface for running and inspecting workflows.
//!
//! # Usage
//!
//! ```bash
//! # Run a workflow definition
//! etlrunner run orders.yaml
//!
//! # With run parameters and a custom store
//! etlrunner run orders.yaml --param date=2024-01-31 --store /var/lib/etlrunner
//!
//! # Continue an interrupted run
//! etlrunner resume 1c4f0b9e-8d2a-4a53-9a43-5b1f0e6c2d11
//!
//! # Inspect past runs
//! etlrunner history orders
//! etlrunner metrics orders
//! ```

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use colored::{ColoredString, Colorize};
use log::{error, info};
use serde_json::Value;
use uuid::Uuid;

use etlrunner::config::EngineConfig;
use etlrunner::execution::{ProcessorRegistry, WorkflowExecutor};
use etlrunner::monitoring::{LogNotifier, TimelineMonitor};
use etlrunner::storage::{FileRepository, Page, WorkflowRepository};
use etlrunner::workflow::{
    load_definition, ExecutionStatus, TriggerType, WorkflowDefinition, WorkflowExecution,
};
use etlrunner::{APP_NAME, VERSION};

/// Store directory used when neither flag, config nor environment names one.
const DEFAULT_STORE_DIR: &str = ".etlrunner";

#[derive(Debug, PartialEq)]
enum Command {
    Run(PathBuf),
    Resume(Uuid),
    History(String),
    Metrics(String),
}

/// Command-line configuration parsed from arguments.
#[derive(Debug)]
struct Cli {
    command: Command,
    store_dir: Option<PathBuf>,
    config_path: Option<PathBuf>,
    parameters: HashMap<String, Value>,
    verbose: bool,
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints the application banner with version information.
fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME.bold(), VERSION);
    println!("Workflow Execution Engine for ETL Pipelines");
    println!();
}

/// Prints usage information.
fn print_usage() {
    println!("Usage: etlrunner <COMMAND> [OPTIONS]");
    println!();
    println!("Commands:");
    println!("  run <WORKFLOW_FILE>      Store and run a workflow definition");
    println!("  resume <EXECUTION_ID>    Continue an interrupted run");
    println!("  history <WORKFLOW_ID>    List recent runs of a workflow");
    println!("  metrics <WORKFLOW_ID>    Show aggregated metrics of a workflow");
    println!();
    println!("Options:");
    println!("  --param KEY=VALUE        Run parameter (repeatable)");
    println!("  --store DIR              Repository directory (default: {})", DEFAULT_STORE_DIR);
    println!("  --config FILE            Engine configuration YAML");
    println!("  --verbose                Enable debug logging");
    println!("  --help                   Show this help message");
    println!("  --version                Show version information");
    println!();
    println!("Examples:");
    println!("  etlrunner run orders.yaml --param date=2024-01-31");
    println!("  etlrunner history orders");
}

/// Parses `KEY=VALUE`; the value is read as JSON when it parses, else kept
/// as a string.
fn parse_parameter(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("Invalid parameter '{}', expected KEY=VALUE", raw))?;

    let key = key.trim();
    if key.is_empty() {
        return Err(format!("Invalid parameter '{}': empty key", raw));
    }

    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

/// Parses command-line arguments. Returns `None` when help or version was
/// printed.
fn parse_arguments(args: &[String]) -> Result<Option<Cli>, String> {
    let mut positional: Vec<String> = Vec::new();
    let mut store_dir = None;
    let mut config_path = None;
    let mut parameters = HashMap::new();
    let mut verbose = false;
    let mut i = 1; // Skip program name

    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                return Ok(None);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                return Ok(None);
            }
            "--verbose" | "-v" => {
                verbose = true;
            }
            "--store" | "--config" | "--param" => {
                i += 1;
                let Some(value) = args.get(i) else {
                    return Err(format!("{} requires an argument", arg));
                };
                match arg.as_str() {
                    "--store" => store_dir = Some(PathBuf::from(value)),
                    "--config" => config_path = Some(PathBuf::from(value)),
                    _ => {
                        let (key, value) = parse_parameter(value)?;
                        parameters.insert(key, value);
                    }
                }
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => positional.push(arg.clone()),
        }
        i += 1;
    }

    let mut positional = positional.into_iter();
    let command = match (positional.next().as_deref(), positional.next()) {
        (Some("run"), Some(path)) => Command::Run(PathBuf::from(path)),
        (Some("resume"), Some(id)) => Command::Resume(
            Uuid::parse_str(&id).map_err(|_| format!("Invalid execution id: {}", id))?,
        ),
        (Some("history"), Some(id)) => Command::History(id),
        (Some("metrics"), Some(id)) => Command::Metrics(id),
        (Some(cmd @ ("run" | "resume" | "history" | "metrics")), None) => {
            return Err(format!("'{}' requires an argument", cmd));
        }
        (Some(other), _) => return Err(format!("Unknown command: {}", other)),
        (None, _) => return Err("No command given".to_string()),
    };

    if let Some(extra) = positional.next() {
        return Err(format!("Unexpected argument: {}", extra));
    }

    Ok(Some(Cli {
        command,
        store_dir,
        config_path,
        parameters,
        verbose,
    }))
}

fn colored_status(status: ExecutionStatus) -> ColoredString {
    let text = status.to_string();
    match status {
        ExecutionStatus::Completed => text.green().bold(),
        ExecutionStatus::Failed => text.red().bold(),
        ExecutionStatus::Cancelled | ExecutionStatus::Paused => text.yellow().bold(),
        ExecutionStatus::Running | ExecutionStatus::NotStarted => text.cyan(),
    }
}

/// Reuses the latest stored version when its content is unchanged, so
/// repeated runs of the same file do not pile up versions.
fn store_definition(
    repository: &dyn WorkflowRepository,
    definition: WorkflowDefinition,
) -> Result<WorkflowDefinition, Box<dyn std::error::Error>> {
    if definition.version.trim().is_empty() {
        if let Some(latest) = repository.get_definition(&definition.id, None)? {
            let mut unversioned = latest.clone();
            unversioned.version = String::new();
            if unversioned == definition {
                return Ok(latest);
            }
        }
    }
    Ok(repository.save_definition(definition)?)
}

fn print_outcome(execution: &WorkflowExecution, monitor: &TimelineMonitor) {
    println!();
    println!(
        "Execution {} finished: {}",
        execution.id,
        colored_status(execution.status)
    );
    for error in &execution.errors {
        println!(
            "  {} [{}] {}",
            error.step_id.as_deref().unwrap_or("workflow").red(),
            error.error_type,
            error.message
        );
    }
    println!("{}", monitor.gantt_chart(execution.id));
}

fn exit_code(execution: &WorkflowExecution) -> ExitCode {
    if execution.status == ExecutionStatus::Completed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Main application entry point.
fn run() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    // Parse arguments
    let cli = match parse_arguments(&args) {
        Ok(Some(cli)) => cli,
        Ok(None) => return Ok(ExitCode::SUCCESS),
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            print_usage();
            return Err(e.into());
        }
    };

    // Setup logging
    setup_logging(cli.verbose);

    // Print banner
    print_banner();

    let config = match &cli.config_path {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::from_env(),
    };

    let store_dir = cli
        .store_dir
        .clone()
        .or_else(|| config.store_dir.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_DIR));
    info!("Repository: {}", store_dir.display());

    let repository: Arc<dyn WorkflowRepository> = Arc::new(FileRepository::open(&store_dir)?);
    let monitor = Arc::new(TimelineMonitor::with_repository(Arc::clone(&repository)));

    let executor = WorkflowExecutor::new(ProcessorRegistry::dry_run(), Arc::clone(&repository))
        .with_monitor(monitor.clone())
        .with_notifier(Arc::new(LogNotifier))
        .with_config(config);

    match cli.command {
        Command::Run(path) => {
            let definition = load_definition(&path).map_err(|e| {
                error!("Failed to load workflow: {}", e);
                format!("Could not load workflow from '{}': {}", path.display(), e)
            })?;

            let problems = executor.registry().validate_definition(&definition);
            for problem in &problems {
                error!("{}", problem);
            }
            if !problems.is_empty() {
                return Err(format!("{} step(s) cannot run", problems.len()).into());
            }

            let definition = store_definition(repository.as_ref(), definition)?;
            info!(
                "Workflow loaded: '{}' version {} ({} steps)",
                definition.display_name(),
                definition.version,
                definition.steps.len()
            );

            let execution = executor.execute(&definition, cli.parameters, TriggerType::Manual);
            print_outcome(&execution, &monitor);
            Ok(exit_code(&execution))
        }

        Command::Resume(id) => {
            let execution = executor.resume(id)?;
            print_outcome(&execution, &monitor);
            Ok(exit_code(&execution))
        }

        Command::History(workflow_id) => {
            let history = repository.execution_history(&workflow_id, Page::default())?;
            if history.items.is_empty() {
                println!("No runs of '{}' recorded", workflow_id);
                return Ok(ExitCode::SUCCESS);
            }

            println!("Runs of '{}' ({} total):", workflow_id.bold(), history.total);
            for execution in &history.items {
                let started = execution
                    .start_time
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "-".to_string());
                let duration = execution
                    .duration_ms()
                    .map(|d| format!("{} ms", d))
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "  {}  {}  v{}  {}  {}",
                    execution.id,
                    started,
                    execution.workflow_version,
                    colored_status(execution.status),
                    duration
                );
            }
            if history.has_more() {
                println!("  ...");
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Metrics(workflow_id) => {
            let metrics = repository.workflow_metrics(&workflow_id)?;
            println!("Metrics for '{}':", workflow_id.bold());
            println!("  Total runs: {}", metrics.total_executions);
            for status in ExecutionStatus::ALL {
                let count = metrics.count(status);
                if count > 0 {
                    println!("  {}: {}", colored_status(status), count);
                }
            }
            if let Some(rate) = metrics.success_rate() {
                println!("  Success rate: {:.1}%", rate * 100.0);
            }
            if let (Some(min), Some(avg), Some(max)) = (
                metrics.min_duration_ms,
                metrics.avg_duration_ms,
                metrics.max_duration_ms,
            ) {
                println!("  Duration: min {} ms, avg {:.0} ms, max {} ms", min, avg, max);
            }
            if !metrics.top_errors.is_empty() {
                println!("  Top errors:");
                for signature in &metrics.top_errors {
                    println!(
                        "    {}x {} [{}] {}",
                        signature.count,
                        signature.step_id.as_deref().unwrap_or("workflow"),
                        signature.error_type,
                        signature.message
                    );
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!();
            eprintln!("{} {}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("etlrunner")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_parse_run_with_options() {
        let cli = parse_arguments(&args(&[
            "run",
            "orders.yaml",
            "--param",
            "date=2024-01-31",
            "--param",
            "limit=10",
            "--store",
            "/tmp/store",
            "--verbose",
        ]))
        .unwrap()
        .unwrap();

        assert_eq!(cli.command, Command::Run(PathBuf::from("orders.yaml")));
        assert_eq!(cli.store_dir, Some(PathBuf::from("/tmp/store")));
        assert_eq!(cli.parameters["date"], Value::String("2024-01-31".into()));
        assert_eq!(cli.parameters["limit"], serde_json::json!(10));
        assert!(cli.verbose);
    }

    #[test]
    fn test_parse_resume_requires_uuid() {
        assert!(parse_arguments(&args(&["resume", "not-a-uuid"])).is_err());

        let id = Uuid::new_v4();
        let cli = parse_arguments(&args(&["resume", &id.to_string()]))
            .unwrap()
            .unwrap();
        assert_eq!(cli.command, Command::Resume(id));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_arguments(&args(&[])).is_err());
        assert!(parse_arguments(&args(&["history"])).is_err());
        assert!(parse_arguments(&args(&["deploy", "x"])).is_err());
        assert!(parse_arguments(&args(&["metrics", "a", "b"])).is_err());
        assert!(parse_arguments(&args(&["run", "x.yaml", "--store"])).is_err());
        assert!(parse_arguments(&args(&["run", "x.yaml", "--bogus"])).is_err());
    }

    #[test]
    fn test_parse_parameter() {
        assert_eq!(
            parse_parameter("flag=true").unwrap(),
            ("flag".to_string(), Value::Bool(true))
        );
        assert_eq!(
            parse_parameter("name=a=b").unwrap(),
            ("name".to_string(), Value::String("a=b".into()))
        );
        assert!(parse_parameter("novalue").is_err());
        assert!(parse_parameter("=x").is_err());
    }

    #[test]
    fn test_store_definition_reuses_unchanged_version() {
        use etlrunner::storage::InMemoryRepository;
        use etlrunner::workflow::{StepType, WorkflowStep};

        let repository = InMemoryRepository::new();
        let definition = WorkflowDefinition::from_steps(
            "orders",
            vec![WorkflowStep::new("extract", StepType::Extract)],
        );

        let first = store_definition(&repository, definition.clone()).unwrap();
        let second = store_definition(&repository, definition.clone()).unwrap();
        assert_eq!(first.version, second.version);

        let mut changed = definition;
        changed.description = "changed".into();
        let third = store_definition(&repository, changed).unwrap();
        assert_ne!(third.version, first.version);
    }
}
