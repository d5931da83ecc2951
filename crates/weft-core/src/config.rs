//! Configuration management for weft.
//!
//! Loads configuration from ${WEFT_HOME}/config.toml with sensible defaults.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// Returns the default config template with comments.
///
/// This is embedded from `default_config.toml` at compile time.
fn default_config_template() -> &'static str {
    include_str!("../default_config.toml")
}

pub mod paths {
    //! Path helpers for weft configuration.
    //!
    //! Resolution order for the home directory:
    //! 1. `WEFT_HOME` env var
    //! 2. ~/.config/weft (default)

    use std::path::PathBuf;

    /// Returns the weft home directory.
    pub fn weft_home() -> PathBuf {
        if let Ok(home) = std::env::var("WEFT_HOME") {
            return PathBuf::from(home);
        }

        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("weft")
    }

    /// Returns the path to the config.toml file.
    pub fn config_path() -> PathBuf {
        weft_home().join("config.toml")
    }
}

/// Memory store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Maximum pages kept before eviction.
    pub capacity: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self { capacity: 256 }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `tracing` filter directive, e.g. `warn` or `weft_core=debug`.
    pub level: String,
    /// Optional log file; logs go to stderr when unset.
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            file: None,
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Optional override for the fixed system framing
    pub system_prompt: Option<String>,

    /// Drift added per execution step
    pub drift_increment: f64,

    /// Drift at which a session interrupts and a sync pulse is due
    pub drift_threshold: f64,

    /// Bound on tool-call passes per task
    pub max_interrupt_passes: usize,

    /// Per-tool timeout in seconds (clamped to at least 1)
    pub tool_timeout_secs: u64,

    /// Idle TTL for session reaping in seconds
    pub task_ttl_secs: u64,

    /// Priority assigned to newly admitted sessions
    pub default_priority: i32,

    /// Release the session TCB when a task completes
    pub release_on_completion: bool,

    /// Domain keyword that raises archived page importance
    pub importance_keyword: String,

    #[serde(default)]
    pub memory: MemoryConfig,

    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a reasoning kernel coordinating tool-using agents. \
         To call a tool, reply with <tool_call>{\"name\": ..., \"arguments\": {...}}</tool_call>. \
         Tool results arrive as <tool_response>...</tool_response>.";
    const DEFAULT_DRIFT_INCREMENT: f64 = 0.05;
    const DEFAULT_DRIFT_THRESHOLD: f64 = 0.5;
    const DEFAULT_MAX_INTERRUPT_PASSES: usize = 3;
    const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 30;
    const DEFAULT_TASK_TTL_SECS: u64 = 900;
    const DEFAULT_IMPORTANCE_KEYWORD: &str = "critical";

    /// Loads configuration from the default config path.
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_path())
    }

    /// Loads configuration from a specific path.
    /// Returns defaults if file doesn't exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            let config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config from {}", path.display()))?;
            config
                .validate()
                .with_context(|| format!("Invalid config in {}", path.display()))?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Writes the default template to `path`.
    ///
    /// Creates parent directories. Fails if the file already exists.
    pub fn init(path: &Path) -> Result<()> {
        if path.exists() {
            bail!("Config file already exists at {}", path.display());
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(path, default_config_template())
            .with_context(|| format!("Failed to write config to {}", path.display()))
    }

    fn validate(&self) -> Result<()> {
        if !(self.drift_increment.is_finite() && self.drift_increment >= 0.0) {
            bail!("drift_increment must be a non-negative number");
        }
        if !(self.drift_threshold.is_finite() && self.drift_threshold > 0.0) {
            bail!("drift_threshold must be a positive number");
        }
        Ok(())
    }

    /// Returns the system framing sent with every generation step.
    pub fn effective_system_prompt(&self) -> &str {
        match self.system_prompt.as_deref().map(str::trim) {
            Some(prompt) if !prompt.is_empty() => prompt,
            _ => Self::DEFAULT_SYSTEM_PROMPT,
        }
    }

    /// Per-tool timeout. Never zero: a tool that never returns must not
    /// stall the interrupt loop.
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs.max(1))
    }

    pub fn task_ttl(&self) -> Duration {
        Duration::from_secs(self.task_ttl_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            system_prompt: None,
            drift_increment: Self::DEFAULT_DRIFT_INCREMENT,
            drift_threshold: Self::DEFAULT_DRIFT_THRESHOLD,
            max_interrupt_passes: Self::DEFAULT_MAX_INTERRUPT_PASSES,
            tool_timeout_secs: Self::DEFAULT_TOOL_TIMEOUT_SECS,
            task_ttl_secs: Self::DEFAULT_TASK_TTL_SECS,
            default_priority: 1,
            release_on_completion: true,
            importance_keyword: Self::DEFAULT_IMPORTANCE_KEYWORD.to_string(),
            memory: MemoryConfig::default(),
            log: LogConfig::default(),
        }
    }
}
