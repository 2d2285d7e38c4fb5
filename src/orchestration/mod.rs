//! Orchestration layer.
//!
//! Sequencing and batch planning over a validated [`TaskGraph`], plus the
//! orchestrator that drives a plan against pluggable agent executors.

pub mod command;
pub mod executor;
pub mod orchestrator;
pub mod planner;
pub mod sequencer;

pub use command::CommandAgent;
pub use executor::{AgentExecutor, AgentOutcome, AgentRegistry, AgentResponse};
pub use orchestrator::{
    ExecutionError, ExecutionErrorKind, ExecutionResult, Orchestrator, OrchestratorConfig,
    OrchestratorEvent, RunId, RunReport,
};
pub use planner::{Batch, BatchPlanner, ExecutionPlan};
pub use sequencer::{CriticalPath, Sequencer};

use tracing::info;

use crate::config::Config;
use crate::core::builder::build_dag;
use crate::core::dag::TaskGraph;
use crate::core::task::TaskSpec;
use crate::error::Result;

/// Build, check, plan, and execute `specs` in one call.
///
/// Structural and configuration problems are returned as `Err` before any
/// task is dispatched; execution failures live in the returned report.
pub async fn run(specs: &[TaskSpec], registry: AgentRegistry, config: &Config) -> Result<RunReport> {
    config.validate()?;
    let mut graph: TaskGraph = build_dag(specs)?;
    registry.check(&graph)?;

    let plan = BatchPlanner::plan(&graph)?;
    info!(
        tasks = graph.task_count(),
        batches = plan.batches.len(),
        "execution plan ready"
    );

    Orchestrator::new(registry, OrchestratorConfig::from(config))
        .orchestrate(&mut graph, &plan)
        .await
}
