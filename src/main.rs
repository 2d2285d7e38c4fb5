use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing::{error, info};

use conductor::config::Config;
use conductor::core::{build_dag, TaskSpec};
use conductor::orchestration::{
    AgentRegistry, BatchPlanner, CommandAgent, Orchestrator, OrchestratorConfig, Sequencer,
};
use conductor::util::blocking;
use conductor::Result;

/// Conductor - dependency-aware task scheduler for agent workloads
#[derive(Parser, Debug)]
#[command(name = "conductor")]
#[command(version, about, long_about = None)]
#[command(
    after_help = "ENVIRONMENT:\n    CONDUCTOR_DEBUG=1         Enable debug logging (alternative to --debug)\n    CONDUCTOR_LOG=<filter>    tracing filter directive, overrides --debug"
)]
pub struct Cli {
    /// Enable debug logging (written to stderr)
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Build the task graph and report its order and critical path
    Validate {
        /// JSON task file (array or {"tasks": [...]})
        tasks: PathBuf,
    },

    /// Print the batch plan for a task file
    Plan {
        tasks: PathBuf,

        /// Re-check the plan's invariants before printing
        #[arg(long)]
        check: bool,
    },

    /// Execute a task file with the configured agent commands
    Run {
        tasks: PathBuf,

        /// Config file (defaults to ~/.conductor/conductor.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override max_parallel
        #[arg(long)]
        max_parallel: Option<usize>,

        /// Stop dispatching after the first failure
        #[arg(long)]
        abort_on_failure: bool,

        /// Override task_timeout_secs
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
    },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TaskFile {
    List(Vec<TaskSpec>),
    Wrapped { tasks: Vec<TaskSpec> },
}

fn parse_specs(json: &str) -> Result<Vec<TaskSpec>> {
    Ok(match serde_json::from_str(json)? {
        TaskFile::List(tasks) | TaskFile::Wrapped { tasks } => tasks,
    })
}

async fn load_specs(path: &Path) -> Result<Vec<TaskSpec>> {
    let path = path.to_path_buf();
    blocking(move || parse_specs(&std::fs::read_to_string(&path)?)).await
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    conductor::log::init_with_debug(cli.debug);

    let code = match execute(cli.command) {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            if e.is_structural() || e.is_configuration() {
                2
            } else {
                1
            }
        }
    };
    std::process::exit(code);
}

/// Returns whether the command fully succeeded.
fn execute(command: Command) -> Result<bool> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        match command {
            Command::Validate { tasks } => run_validate(&tasks).await,
            Command::Plan { tasks, check } => run_plan(&tasks, check).await,
            Command::Run {
                tasks,
                config,
                max_parallel,
                abort_on_failure,
                timeout,
            } => {
                let mut config = match config {
                    Some(path) => blocking(move || Config::load_from(&path)).await?,
                    None => blocking(Config::load).await?,
                };
                if let Some(max_parallel) = max_parallel {
                    config.max_parallel = max_parallel;
                }
                if abort_on_failure {
                    config.abort_on_failure = true;
                }
                if let Some(secs) = timeout {
                    config.task_timeout_secs = secs;
                }
                config.validate()?;
                run_tasks(&tasks, &config).await
            }
        }
    })
}

async fn run_validate(tasks: &Path) -> Result<bool> {
    let specs = load_specs(tasks).await?;
    let graph = build_dag(&specs)?;
    let order = Sequencer::topological_order(&graph)?;
    let critical_path = Sequencer::critical_path(&graph)?;

    info!(tasks = graph.task_count(), "task graph is valid");
    print_json(&serde_json::json!({
        "valid": true,
        "tasks": graph.task_count(),
        "dependencies": graph.dependency_count(),
        "order": order,
        "critical_path": critical_path,
    }))?;
    Ok(true)
}

async fn run_plan(tasks: &Path, check: bool) -> Result<bool> {
    let specs = load_specs(tasks).await?;
    let graph = build_dag(&specs)?;
    let plan = BatchPlanner::plan(&graph)?;
    if check {
        plan.validate(&graph)?;
    }

    print_json(&serde_json::json!({
        "batches": plan.batches,
        "critical_path": Sequencer::critical_path(&graph)?,
    }))?;
    Ok(true)
}

fn build_registry(config: &Config) -> Result<AgentRegistry> {
    let mut registry = AgentRegistry::new();
    for (agent_type, agent) in config.agent_commands()? {
        registry.register(agent_type, Arc::new(CommandAgent::from_config(agent)?));
    }
    Ok(registry)
}

async fn run_tasks(tasks: &Path, config: &Config) -> Result<bool> {
    let specs = load_specs(tasks).await?;
    let mut graph = build_dag(&specs)?;
    let registry = build_registry(config)?;
    registry.check(&graph)?;

    let plan = BatchPlanner::plan(&graph)?;
    let report = Orchestrator::new(registry, OrchestratorConfig::from(config))
        .orchestrate(&mut graph, &plan)
        .await?;

    print_json(&report)?;
    if !report.success {
        info!(
            failed = report.failed().len(),
            blocked = report.blocked().len(),
            "run did not fully succeed"
        );
    }
    Ok(report.success)
}
