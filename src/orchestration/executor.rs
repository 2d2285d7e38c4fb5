//! The agent execution seam.
//!
//! The orchestrator never knows how work is performed. It hands each task's
//! `input` to an [`AgentExecutor`] chosen by the task's [`AgentType`] and
//! records whatever comes back. The [`AgentRegistry`] is the explicit
//! mapping from agent type to executor; a graph that mentions an unmapped
//! type is rejected before anything is dispatched.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::dag::TaskGraph;
use crate::core::task::AgentType;
use crate::error::{Error, Result};

/// Outcome reported by an executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AgentOutcome {
    Success {
        /// Opaque output, passed through to the result map.
        output: serde_json::Value,
    },
    Error {
        message: String,
    },
}

/// Response from one executor invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    #[serde(flatten)]
    pub outcome: AgentOutcome,
    /// Wall time as measured by the executor, if it reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl AgentResponse {
    pub fn success(output: serde_json::Value) -> Self {
        Self {
            outcome: AgentOutcome::Success { output },
            duration_ms: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            outcome: AgentOutcome::Error {
                message: message.into(),
            },
            duration_ms: None,
        }
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, AgentOutcome::Success { .. })
    }

    /// Get the output if successful.
    pub fn output(&self) -> Option<&serde_json::Value> {
        match &self.outcome {
            AgentOutcome::Success { output } => Some(output),
            AgentOutcome::Error { .. } => None,
        }
    }

    /// Get the error message if failed.
    pub fn error_message(&self) -> Option<&str> {
        match &self.outcome {
            AgentOutcome::Success { .. } => None,
            AgentOutcome::Error { message } => Some(message),
        }
    }
}

/// An external collaborator that performs the work of one task.
///
/// Implementations may be slow and may fail. Returning `Err` and returning
/// an [`AgentOutcome::Error`] are treated alike by the orchestrator: both
/// become an execution failure local to the task.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    async fn execute(
        &self,
        agent_type: AgentType,
        input: &serde_json::Value,
    ) -> Result<AgentResponse>;
}

/// Explicit mapping from [`AgentType`] to executor.
#[derive(Clone, Default)]
pub struct AgentRegistry {
    executors: HashMap<AgentType, Arc<dyn AgentExecutor>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `agent_type` to `executor`, replacing any previous mapping.
    pub fn register(&mut self, agent_type: AgentType, executor: Arc<dyn AgentExecutor>) {
        self.executors.insert(agent_type, executor);
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, agent_type: AgentType, executor: Arc<dyn AgentExecutor>) -> Self {
        self.register(agent_type, executor);
        self
    }

    /// Map every agent type to the same executor.
    pub fn with_all(mut self, executor: Arc<dyn AgentExecutor>) -> Self {
        for agent_type in AgentType::ALL {
            self.register(agent_type, Arc::clone(&executor));
        }
        self
    }

    pub fn get(&self, agent_type: AgentType) -> Option<Arc<dyn AgentExecutor>> {
        self.executors.get(&agent_type).cloned()
    }

    pub fn contains(&self, agent_type: AgentType) -> bool {
        self.executors.contains_key(&agent_type)
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }

    /// Mapped agent types, sorted.
    pub fn agent_types(&self) -> Vec<AgentType> {
        let mut types: Vec<AgentType> = self.executors.keys().copied().collect();
        types.sort();
        types
    }

    /// Ensure every task in `graph` has an executor.
    ///
    /// Fails on the first unmapped task in input order.
    pub fn check(&self, graph: &TaskGraph) -> Result<()> {
        match graph.tasks().find(|task| !self.contains(task.agent_type)) {
            Some(task) => Err(Error::UnmappedAgentType(task.agent_type)),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("agent_types", &self.agent_types())
            .finish()
    }
}
