//! Task data model for the execution DAG.
//!
//! A [`TaskSpec`] is the loosely-typed record a caller hands in; a [`Task`]
//! is the validated node stored in the graph once its agent type has been
//! parsed and its dependency references resolved to concrete ids.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::Error;

/// Unique identifier for a task within one run.
///
/// Ids are caller-supplied strings and stay stable for the lifetime of the
/// run; ordering is lexicographic so result maps serialize deterministically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Which external executor handles a task.
///
/// This is a closed set: every variant must be mapped to an executor in the
/// [`AgentRegistry`](crate::orchestration::AgentRegistry) before a run is
/// allowed to dispatch anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentType {
    #[serde(alias = "code_generation")]
    CodeGeneration,
    Review,
    Integration,
    Deployment,
    Analysis,
}

impl AgentType {
    pub const ALL: [AgentType; 5] = [
        AgentType::CodeGeneration,
        AgentType::Review,
        AgentType::Integration,
        AgentType::Deployment,
        AgentType::Analysis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::CodeGeneration => "code-generation",
            AgentType::Review => "review",
            AgentType::Integration => "integration",
            AgentType::Deployment => "deployment",
            AgentType::Analysis => "analysis",
        }
    }
}

impl std::fmt::Display for AgentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AgentType {
    type Err = Error;

    /// Accepts kebab-case or snake_case tags, case-insensitively.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('_', "-");
        AgentType::ALL
            .into_iter()
            .find(|agent| agent.as_str() == normalized)
            .ok_or_else(|| Error::UnknownAgentType(s.to_string()))
    }
}

/// A task specification as supplied by the caller.
///
/// `agent_type` stays a raw string here so that an unknown tag surfaces as a
/// configuration error from the builder rather than a parse failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub id: String,
    /// Optional human-readable name; dependencies may refer to it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(alias = "agentType")]
    pub agent_type: String,
    /// Opaque payload passed to the executor untouched.
    #[serde(default)]
    pub input: serde_json::Value,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default, alias = "resourceFootprint")]
    pub resource_footprint: Vec<String>,
    #[serde(default, alias = "estimatedDuration")]
    pub estimated_duration: u64,
    #[serde(default)]
    pub priority: i32,
}

impl TaskSpec {
    /// Create a spec with no dependencies, footprint, or payload.
    pub fn new(id: &str, agent_type: AgentType) -> Self {
        Self {
            id: id.to_string(),
            name: None,
            agent_type: agent_type.as_str().to_string(),
            input: serde_json::Value::Null,
            dependencies: Vec::new(),
            resource_footprint: Vec::new(),
            estimated_duration: 0,
            priority: 0,
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn depends_on(mut self, reference: &str) -> Self {
        self.dependencies.push(reference.to_string());
        self
    }

    pub fn touches(mut self, resource: &str) -> Self {
        self.resource_footprint.push(resource.to_string());
        self
    }

    pub fn with_input(mut self, input: serde_json::Value) -> Self {
        self.input = input;
        self
    }

    pub fn with_duration(mut self, estimated_duration: u64) -> Self {
        self.estimated_duration = estimated_duration;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// Task status in its lifecycle.
///
/// `Pending → Ready → Running → {Succeeded | Failed}`; `Blocked` is terminal
/// and reached only when an upstream dependency did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum TaskStatus {
    /// Waiting on dependencies.
    #[default]
    Pending,
    /// All dependencies succeeded.
    Ready,
    /// Dispatched to an executor.
    Running,
    /// Executor reported success.
    Succeeded,
    /// Executor reported failure or the task timed out.
    Failed {
        /// Error message describing the failure.
        error: String,
    },
    /// Never executed because an upstream task did not succeed.
    Blocked {
        /// Reason why the task is blocked.
        reason: String,
    },
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed { .. } | TaskStatus::Blocked { .. }
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Ready => write!(f, "ready"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Succeeded => write!(f, "succeeded"),
            TaskStatus::Failed { error } => write!(f, "failed: {}", error),
            TaskStatus::Blocked { reason } => write!(f, "blocked: {}", reason),
        }
    }
}

/// A validated node of the task graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub name: Option<String>,
    pub agent_type: AgentType,
    pub input: serde_json::Value,
    /// Resolved dependency ids, deduplicated, in declaration order.
    pub dependencies: Vec<TaskId>,
    pub resource_footprint: BTreeSet<String>,
    pub estimated_duration: u64,
    pub priority: i32,
    /// Position in the input list; the final tie-break everywhere.
    pub input_order: usize,
    pub status: TaskStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Transition to Ready once every dependency has succeeded.
    pub fn mark_ready(&mut self) {
        self.status = TaskStatus::Ready;
    }

    /// Transition to Running and record the start time.
    pub fn start(&mut self) {
        self.status = TaskStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn succeed(&mut self) {
        self.status = TaskStatus::Succeeded;
        self.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: &str) {
        self.status = TaskStatus::Failed {
            error: error.to_string(),
        };
        self.completed_at = Some(Utc::now());
    }

    /// Blocking never overwrites another terminal state.
    pub fn block(&mut self, reason: &str) {
        if self.status.is_terminal() {
            return;
        }
        self.status = TaskStatus::Blocked {
            reason: reason.to_string(),
        };
    }
}
