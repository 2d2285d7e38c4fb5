use thiserror::Error;

use crate::core::task::{AgentType, TaskId};

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    // Structural errors: raised while building the graph, before any dispatch.
    #[error("Task {task} depends on unknown task '{dependency}'")]
    UnknownDependency { task: TaskId, dependency: String },

    #[error("Task {task} dependency '{reference}' is ambiguous (matches {candidates:?})")]
    AmbiguousDependency {
        task: TaskId,
        reference: String,
        candidates: Vec<TaskId>,
    },

    #[error("Duplicate task id: {0}")]
    DuplicateTaskId(TaskId),

    #[error("Cycle detected: {}", format_path(.path))]
    CycleDetected { path: Vec<TaskId> },

    // Configuration errors: raised before dispatch.
    #[error("Unknown agent type: {0}")]
    UnknownAgentType(String),

    #[error("No executor registered for agent type {0}")]
    UnmappedAgentType(AgentType),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Agent command not found: {0}")]
    CommandNotFound(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Task join error: {0}")]
    TaskJoin(String),
}

impl Error {
    /// Structural errors come from the shape of the task set itself.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Error::UnknownDependency { .. }
                | Error::AmbiguousDependency { .. }
                | Error::DuplicateTaskId(_)
                | Error::CycleDetected { .. }
        )
    }

    /// Configuration errors come from the executor mapping or run settings.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::UnknownAgentType(_)
                | Error::UnmappedAgentType(_)
                | Error::InvalidConfig(_)
                | Error::CommandNotFound(_)
        )
    }
}

fn format_path(path: &[TaskId]) -> String {
    path.iter()
        .map(|id| id.as_str())
        .collect::<Vec<_>>()
        .join(" -> ")
}

pub type Result<T> = std::result::Result<T, Error>;
