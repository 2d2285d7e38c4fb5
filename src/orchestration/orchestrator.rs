//! Batch-by-batch execution of an [`ExecutionPlan`].
//!
//! Batches run strictly one after another. Inside a batch every task is
//! dispatched at once and polled concurrently, bounded by a semaphore of
//! `max_parallel` permits; the batch ends when every dispatched task has
//! returned, failed, or timed out. No locking happens at run time: the plan
//! already guarantees that tasks sharing a resource never share a batch.
//!
//! A failed task never aborts its siblings. Its transitive dependents are
//! marked blocked as soon as the failure is observed and are never handed to
//! an executor, while unrelated branches keep going. Execution failures are
//! recorded in the [`RunReport`]; `orchestrate` only returns `Err` for
//! problems found before the first dispatch.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use petgraph::graph::NodeIndex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{self, Config};
use crate::core::dag::TaskGraph;
use crate::core::task::{AgentType, TaskId, TaskStatus};
use crate::error::{Error, Result};
use crate::orchestration::executor::{AgentExecutor, AgentOutcome, AgentRegistry, AgentResponse};
use crate::orchestration::planner::ExecutionPlan;
use crate::util::{backoff_delay, with_timeout};

/// Unique identifier for one orchestrated run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a task did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionErrorKind {
    /// The executor reported a failure or returned an error.
    Agent,
    /// The attempt exceeded the task timeout.
    Timeout,
    /// An upstream dependency did not succeed.
    Blocked,
    /// The run stopped dispatching before this task's batch.
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionError {
    pub kind: ExecutionErrorKind,
    pub message: String,
}

impl ExecutionError {
    pub fn new(kind: ExecutionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Outcome of a single task within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionError>,
    /// Wall time across all attempts, backoff included.
    pub duration_ms: u64,
    /// Time the executor itself reported for the final attempt, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_duration_ms: Option<u64>,
    /// Attempt that produced this result; 0 when never dispatched.
    pub attempt: u32,
}

impl ExecutionResult {
    fn succeeded(output: serde_json::Value, duration_ms: u64, attempt: u32) -> Self {
        Self {
            success: true,
            output: Some(output),
            error: None,
            duration_ms,
            agent_duration_ms: None,
            attempt,
        }
    }

    fn failed(error: ExecutionError, duration_ms: u64, attempt: u32) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error),
            duration_ms,
            agent_duration_ms: None,
            attempt,
        }
    }

    fn not_dispatched(kind: ExecutionErrorKind, message: impl Into<String>) -> Self {
        Self::failed(ExecutionError::new(kind, message), 0, 0)
    }

    fn with_agent_duration(mut self, agent_duration_ms: Option<u64>) -> Self {
        self.agent_duration_ms = agent_duration_ms;
        self
    }

    pub fn error_kind(&self) -> Option<ExecutionErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

/// Final record of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,
    /// True only if every task succeeded.
    pub success: bool,
    pub results: BTreeMap<TaskId, ExecutionResult>,
    pub total_duration_ms: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    fn ids_where(&self, pred: impl Fn(&ExecutionResult) -> bool) -> Vec<&TaskId> {
        self.results
            .iter()
            .filter(|(_, result)| pred(result))
            .map(|(id, _)| id)
            .collect()
    }

    pub fn succeeded(&self) -> Vec<&TaskId> {
        self.ids_where(|r| r.success)
    }

    /// Tasks that were dispatched and failed (agent error or timeout).
    pub fn failed(&self) -> Vec<&TaskId> {
        self.ids_where(|r| {
            matches!(
                r.error_kind(),
                Some(ExecutionErrorKind::Agent | ExecutionErrorKind::Timeout)
            )
        })
    }

    /// Tasks that were never dispatched (blocked or aborted).
    pub fn blocked(&self) -> Vec<&TaskId> {
        self.ids_where(|r| {
            matches!(
                r.error_kind(),
                Some(ExecutionErrorKind::Blocked | ExecutionErrorKind::Aborted)
            )
        })
    }

    pub fn get(&self, id: &str) -> Option<&ExecutionResult> {
        self.results.get(&TaskId::from(id))
    }
}

/// Lifecycle notifications emitted during a run.
///
/// Sent on the optional channel given to [`Orchestrator::with_events`]. The
/// orchestrator awaits channel capacity, so the receiver must keep draining.
#[derive(Debug, Clone, PartialEq)]
pub enum OrchestratorEvent {
    RunStarted {
        run_id: RunId,
        tasks: usize,
        batches: usize,
    },
    BatchStarted {
        index: usize,
        level: usize,
        tasks: Vec<TaskId>,
    },
    /// Every dependency of the task has succeeded.
    TaskReady {
        task_id: TaskId,
    },
    TaskStarted {
        task_id: TaskId,
        agent_type: AgentType,
    },
    /// A failed attempt will be retried as `attempt`.
    TaskRetrying {
        task_id: TaskId,
        attempt: u32,
        error: String,
    },
    TaskSucceeded {
        task_id: TaskId,
        duration_ms: u64,
    },
    TaskFailed {
        task_id: TaskId,
        error: ExecutionError,
    },
    TaskBlocked {
        task_id: TaskId,
        reason: String,
    },
    BatchCompleted {
        index: usize,
        succeeded: usize,
        failed: usize,
    },
    RunCompleted {
        run_id: RunId,
        success: bool,
    },
}

/// Run-time knobs for the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    /// Concurrent tasks per batch.
    pub max_parallel: usize,
    /// Limit for a single attempt.
    pub task_timeout: Duration,
    /// Stop dispatching further batches after the first failure.
    pub abort_on_failure: bool,
    /// Attempts per task, including the first.
    pub max_attempts: u32,
    /// Linear backoff unit between attempts.
    pub retry_backoff: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for OrchestratorConfig {
    fn from(config: &Config) -> Self {
        Self {
            max_parallel: config.max_parallel,
            task_timeout: config.task_timeout(),
            abort_on_failure: config.abort_on_failure,
            max_attempts: config.max_attempts,
            retry_backoff: config.retry_backoff(),
        }
    }
}

impl OrchestratorConfig {
    fn permits(&self) -> usize {
        self.max_parallel.max(1)
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(config::DEFAULT_MAX_ATTEMPTS)
    }
}

/// Everything a dispatched task needs, detached from the graph.
struct Dispatch {
    index: NodeIndex,
    task_id: TaskId,
    agent_type: AgentType,
    input: serde_json::Value,
    executor: Arc<dyn AgentExecutor>,
}

/// Drives an [`ExecutionPlan`] against the executors in an [`AgentRegistry`].
///
/// # Example
///
/// ```ignore
/// use conductor::core::build_dag;
/// use conductor::orchestration::{BatchPlanner, Orchestrator, OrchestratorConfig};
///
/// let mut graph = build_dag(&specs)?;
/// let plan = BatchPlanner::plan(&graph)?;
/// let report = Orchestrator::new(registry, OrchestratorConfig::default())
///     .orchestrate(&mut graph, &plan)
///     .await?;
/// if !report.success {
///     eprintln!("blocked: {:?}", report.blocked());
/// }
/// ```
pub struct Orchestrator {
    registry: AgentRegistry,
    config: OrchestratorConfig,
    event_tx: Option<mpsc::Sender<OrchestratorEvent>>,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(registry: AgentRegistry, config: OrchestratorConfig) -> Self {
        Self {
            registry,
            config,
            event_tx: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_events(mut self, event_tx: mpsc::Sender<OrchestratorEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Stop dispatching new batches once `token` is cancelled.
    ///
    /// The batch in flight is allowed to finish; tasks of later batches end
    /// up blocked with [`ExecutionErrorKind::Aborted`].
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    async fn emit(&self, event: OrchestratorEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event).await;
        }
    }

    /// Execute `plan` against `graph`, applying status transitions to the
    /// graph as tasks progress.
    ///
    /// # Errors
    ///
    /// Fails before any dispatch if an agent type has no executor, if the
    /// plan does not match the graph, or if the graph has already been run.
    /// Task failures are reported in the returned [`RunReport`].
    pub async fn orchestrate(
        &self,
        graph: &mut TaskGraph,
        plan: &ExecutionPlan,
    ) -> Result<RunReport> {
        self.registry.check(graph)?;
        plan.validate(graph)?;
        if let Some(task) = graph.tasks().find(|t| t.status != TaskStatus::Pending) {
            return Err(Error::Validation(format!(
                "task {} is already {}; build a fresh graph for each run",
                task.id, task.status
            )));
        }

        let run_id = RunId::new();
        let started_at = Utc::now();
        let clock = Instant::now();
        // Child token: abort-on-failure stops this run without touching the
        // caller's token.
        let run_token = self.cancel.child_token();
        let mut results: BTreeMap<TaskId, ExecutionResult> = BTreeMap::new();

        info!(
            %run_id,
            tasks = graph.task_count(),
            batches = plan.batches.len(),
            "run started"
        );
        self.emit(OrchestratorEvent::RunStarted {
            run_id,
            tasks: graph.task_count(),
            batches: plan.batches.len(),
        })
        .await;

        self.promote_ready(graph).await;

        for (batch_index, batch) in plan.batches.iter().enumerate() {
            if run_token.is_cancelled() {
                info!(%run_id, batch = batch_index, "run cancelled, not dispatching further batches");
                break;
            }

            let mut dispatches = Vec::with_capacity(batch.len());
            for id in &batch.tasks {
                let Some(index) = graph.node_index(id) else {
                    continue;
                };
                let task = graph.task_at(index);
                if task.status != TaskStatus::Ready {
                    // Blocked by an upstream failure.
                    continue;
                }
                let Some(executor) = self.registry.get(task.agent_type) else {
                    return Err(Error::UnmappedAgentType(task.agent_type));
                };
                dispatches.push(Dispatch {
                    index,
                    task_id: task.id.clone(),
                    agent_type: task.agent_type,
                    input: task.input.clone(),
                    executor,
                });
            }

            if dispatches.is_empty() {
                debug!(batch = batch_index, "batch fully blocked, skipping");
                continue;
            }

            info!(
                batch = batch_index,
                level = batch.level,
                size = dispatches.len(),
                "batch started"
            );
            self.emit(OrchestratorEvent::BatchStarted {
                index: batch_index,
                level: batch.level,
                tasks: dispatches.iter().map(|d| d.task_id.clone()).collect(),
            })
            .await;

            for dispatch in &dispatches {
                graph.task_at_mut(dispatch.index).start();
            }

            let mut outcomes = self.run_batch(dispatches).await;
            outcomes.sort_by_key(|(index, _)| *index);

            let mut succeeded = 0;
            let mut failed = 0;
            for (index, result) in outcomes {
                let task_id = graph.task_at(index).id.clone();

                if result.success {
                    succeeded += 1;
                    graph.task_at_mut(index).succeed();
                    info!(task = %task_id, duration_ms = result.duration_ms, "task succeeded");
                    self.emit(OrchestratorEvent::TaskSucceeded {
                        task_id: task_id.clone(),
                        duration_ms: result.duration_ms,
                    })
                    .await;
                    results.insert(task_id, result);
                    continue;
                }

                failed += 1;
                let error = result
                    .error
                    .clone()
                    .unwrap_or_else(|| ExecutionError::new(ExecutionErrorKind::Agent, "unknown failure"));
                graph.task_at_mut(index).fail(&error.message);
                warn!(task = %task_id, attempt = result.attempt, error = %error, "task failed");
                self.emit(OrchestratorEvent::TaskFailed {
                    task_id: task_id.clone(),
                    error,
                })
                .await;
                results.insert(task_id.clone(), result);

                self.block_dependents(graph, index, &task_id, &mut results)
                    .await;

                if self.config.abort_on_failure {
                    run_token.cancel();
                }
            }

            self.promote_ready(graph).await;

            info!(batch = batch_index, succeeded, failed, "batch completed");
            self.emit(OrchestratorEvent::BatchCompleted {
                index: batch_index,
                succeeded,
                failed,
            })
            .await;
        }

        // Anything not yet terminal was never reached.
        let unreached: Vec<NodeIndex> = graph
            .node_indices()
            .filter(|&index| !graph.task_at(index).status.is_terminal())
            .collect();
        for index in unreached {
            let reason = "run aborted before dispatch";
            let task = graph.task_at_mut(index);
            task.block(reason);
            let task_id = task.id.clone();
            self.emit(OrchestratorEvent::TaskBlocked {
                task_id: task_id.clone(),
                reason: reason.to_string(),
            })
            .await;
            results.insert(
                task_id,
                ExecutionResult::not_dispatched(ExecutionErrorKind::Aborted, reason),
            );
        }

        let success = results.len() == graph.task_count() && results.values().all(|r| r.success);
        let report = RunReport {
            run_id,
            success,
            results,
            total_duration_ms: clock.elapsed().as_millis() as u64,
            started_at,
            finished_at: Utc::now(),
        };

        info!(
            %run_id,
            success,
            succeeded = report.succeeded().len(),
            failed = report.failed().len(),
            blocked = report.blocked().len(),
            total_duration_ms = report.total_duration_ms,
            "run completed"
        );
        self.emit(OrchestratorEvent::RunCompleted { run_id, success })
            .await;

        Ok(report)
    }

    /// Move tasks whose dependencies have all succeeded to `Ready`.
    async fn promote_ready(&self, graph: &mut TaskGraph) {
        for index in graph.promote_ready() {
            let task_id = graph.task_at(index).id.clone();
            debug!(task = %task_id, "task ready");
            self.emit(OrchestratorEvent::TaskReady { task_id }).await;
        }
    }

    /// Mark every transitive dependent of a failed task as blocked.
    async fn block_dependents(
        &self,
        graph: &mut TaskGraph,
        failed: NodeIndex,
        failed_id: &TaskId,
        results: &mut BTreeMap<TaskId, ExecutionResult>,
    ) {
        let reason = format!("dependency {} failed", failed_id);
        for index in graph.transitive_dependents(failed) {
            let task = graph.task_at_mut(index);
            if task.status.is_terminal() {
                continue;
            }
            task.block(&reason);
            let task_id = task.id.clone();
            debug!(task = %task_id, upstream = %failed_id, "task blocked");
            self.emit(OrchestratorEvent::TaskBlocked {
                task_id: task_id.clone(),
                reason: reason.clone(),
            })
            .await;
            results.insert(
                task_id,
                ExecutionResult::not_dispatched(ExecutionErrorKind::Blocked, reason.clone()),
            );
        }
    }

    /// Dispatch one batch and wait for every task in it.
    async fn run_batch(&self, dispatches: Vec<Dispatch>) -> Vec<(NodeIndex, ExecutionResult)> {
        let semaphore = Arc::new(Semaphore::new(self.config.permits()));
        let mut in_flight: FuturesUnordered<_> = dispatches
            .into_iter()
            .map(|dispatch| {
                let semaphore = Arc::clone(&semaphore);
                async move {
                    // The semaphore is never closed.
                    let _permit = semaphore.acquire_owned().await.ok();
                    self.execute_with_retry(dispatch).await
                }
            })
            .collect();

        let mut outcomes = Vec::new();
        while let Some(outcome) = in_flight.next().await {
            outcomes.push(outcome);
        }
        outcomes
    }

    async fn execute_with_retry(&self, dispatch: Dispatch) -> (NodeIndex, ExecutionResult) {
        let max_attempts = self.config.attempts();
        let started = Instant::now();
        let elapsed_ms = || started.elapsed().as_millis() as u64;

        debug!(task = %dispatch.task_id, agent = %dispatch.agent_type, "task started");
        self.emit(OrchestratorEvent::TaskStarted {
            task_id: dispatch.task_id.clone(),
            agent_type: dispatch.agent_type,
        })
        .await;

        let mut attempt = 1;
        loop {
            let outcome = with_timeout(
                self.config.task_timeout,
                dispatch.executor.execute(dispatch.agent_type, &dispatch.input),
            )
            .await;

            let (error, agent_duration_ms) = match outcome {
                Ok(AgentResponse {
                    outcome,
                    duration_ms,
                }) => match outcome {
                    AgentOutcome::Success { output } => {
                        let result = ExecutionResult::succeeded(output, elapsed_ms(), attempt)
                            .with_agent_duration(duration_ms);
                        return (dispatch.index, result);
                    }
                    AgentOutcome::Error { message } => (
                        ExecutionError::new(ExecutionErrorKind::Agent, message),
                        duration_ms,
                    ),
                },
                Err(Error::Timeout(limit)) => (
                    ExecutionError::new(
                        ExecutionErrorKind::Timeout,
                        format!("timed out after {}ms", limit.as_millis()),
                    ),
                    None,
                ),
                Err(e) => (ExecutionError::new(ExecutionErrorKind::Agent, e.to_string()), None),
            };

            if attempt >= max_attempts {
                let result = ExecutionResult::failed(error, elapsed_ms(), attempt)
                    .with_agent_duration(agent_duration_ms);
                return (dispatch.index, result);
            }

            warn!(
                task = %dispatch.task_id,
                attempt,
                max_attempts,
                error = %error,
                "attempt failed, retrying"
            );
            self.emit(OrchestratorEvent::TaskRetrying {
                task_id: dispatch.task_id.clone(),
                attempt: attempt + 1,
                error: error.message,
            })
            .await;
            tokio::time::sleep(backoff_delay(self.config.retry_backoff, attempt)).await;
            attempt += 1;
        }
    }
}
