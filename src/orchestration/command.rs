//! Process-backed agent executor.
//!
//! `CommandAgent` runs one external program per invocation. The task input
//! is written to the child's stdin as JSON; a zero exit status is a success
//! and stdout becomes the output (parsed as JSON when possible, otherwise
//! kept as a trimmed string). The agent type is exported to the child as
//! `CONDUCTOR_AGENT_TYPE`.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, trace};

use crate::config::{expand_tilde, AgentCommand};
use crate::core::task::AgentType;
use crate::error::{Error, Result};
use crate::orchestration::executor::{AgentExecutor, AgentResponse};

/// Environment variable carrying the agent type tag.
pub const AGENT_TYPE_ENV: &str = "CONDUCTOR_AGENT_TYPE";

#[derive(Debug, Clone)]
pub struct CommandAgent {
    program: PathBuf,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl CommandAgent {
    /// Create an agent for `program` without checking that it exists.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    /// Locate `command` on `PATH` (or expand it as a path) and build an agent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CommandNotFound`] if the program cannot be found.
    pub fn resolve(command: &str) -> Result<Self> {
        let program = which::which(expand_tilde(command))
            .map_err(|_| Error::CommandNotFound(command.to_string()))?;
        Ok(Self::new(program))
    }

    pub fn from_config(agent: &AgentCommand) -> Result<Self> {
        Ok(Self::resolve(&agent.command)?.with_args(agent.args.clone()))
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn is_available(&self) -> bool {
        which::which(&self.program).is_ok()
    }

    fn parse_output(stdout: &str) -> serde_json::Value {
        let trimmed = stdout.trim();
        serde_json::from_str(trimmed)
            .unwrap_or_else(|_| serde_json::Value::String(trimmed.to_string()))
    }
}

#[async_trait]
impl AgentExecutor for CommandAgent {
    async fn execute(
        &self,
        agent_type: AgentType,
        input: &serde_json::Value,
    ) -> Result<AgentResponse> {
        let started = Instant::now();
        let payload = serde_json::to_vec(input)?;

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .env(AGENT_TYPE_ENV, agent_type.as_str())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // A timed-out attempt drops this future; take the child with it.
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        debug!(program = %self.program.display(), %agent_type, "spawning agent");
        let mut child = command.spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(&payload).await {
                Ok(()) => {}
                // The child may exit without reading its input.
                Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                    trace!("agent closed stdin early");
                }
                Err(e) => return Err(e.into()),
            }
        }

        let output = child.wait_with_output().await?;
        let duration_ms = started.elapsed().as_millis() as u64;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if output.status.success() {
            return Ok(AgentResponse::success(Self::parse_output(&stdout)).with_duration(duration_ms));
        }

        let message = if stderr.trim().is_empty() {
            format!(
                "agent exited with code {}",
                output.status.code().unwrap_or(-1)
            )
        } else {
            stderr.trim().to_string()
        };
        Ok(AgentResponse::failure(message).with_duration(duration_ms))
    }
}
