use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::core::task::AgentType;
use crate::{Error, Result};

pub const DEFAULT_MAX_PARALLEL: usize = 4;
pub const DEFAULT_TASK_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 1;
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 500;

/// External command backing one agent type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCommand {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Worker pool size within a batch.
    pub max_parallel: usize,
    pub task_timeout_secs: u64,
    /// Stop dispatching further batches after the first failure.
    pub abort_on_failure: bool,
    /// Attempts per task, including the first.
    pub max_attempts: u32,
    /// Linear backoff unit between attempts.
    pub retry_backoff_ms: u64,
    /// Agent type tag to command, e.g. `[agents.review]`.
    pub agents: BTreeMap<String, AgentCommand>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_parallel: DEFAULT_MAX_PARALLEL,
            task_timeout_secs: DEFAULT_TASK_TIMEOUT_SECS,
            abort_on_failure: false,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            agents: BTreeMap::new(),
        }
    }
}

impl Config {
    pub fn conductor_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".conductor"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::conductor_dir()?.join("conductor.toml"))
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Load from the default location, falling back to defaults.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "Config::load");
        if !path.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        config.validate()?;
        debug!(
            max_parallel = config.max_parallel,
            task_timeout_secs = config.task_timeout_secs,
            abort_on_failure = config.abort_on_failure,
            max_attempts = config.max_attempts,
            agents = config.agents.len(),
            "Config loaded"
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                debug!(dir = %dir.display(), "Creating config directory");
                fs::create_dir_all(dir)?;
            }
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        debug!(path = %path.display(), "Config saved");
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_parallel == 0 {
            return Err(Error::InvalidConfig("max_parallel must be at least 1".into()));
        }
        if self.task_timeout_secs == 0 {
            return Err(Error::InvalidConfig(
                "task_timeout_secs must be greater than 0".into(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(Error::InvalidConfig("max_attempts must be at least 1".into()));
        }
        for (tag, agent) in &self.agents {
            tag.parse::<AgentType>()?;
            if agent.command.trim().is_empty() {
                return Err(Error::InvalidConfig(format!(
                    "agent '{}' has an empty command",
                    tag
                )));
            }
        }
        Ok(())
    }

    /// Configured agent commands keyed by parsed agent type.
    pub fn agent_commands(&self) -> Result<BTreeMap<AgentType, &AgentCommand>> {
        self.agents
            .iter()
            .map(|(tag, agent)| Ok((tag.parse::<AgentType>()?, agent)))
            .collect()
    }
}

/// Expand a leading `~/` to the home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
