//! Agent configuration stored under `.coder/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Default config location, relative to the session root.
pub const CONFIG_RELATIVE_PATH: &str = ".coder/config.toml";

pub fn default_config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_RELATIVE_PATH)
}

/// Agent configuration (TOML).
///
/// Meant to be edited by humans. Missing fields fall back to defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct CoderConfig {
    pub model: ModelConfig,
    pub agent: LoopConfig,
    pub tools: ToolConfig,
}

/// Completion service settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    pub name: String,
    /// Base URL of the chat service; `/api/chat` is appended.
    pub endpoint: String,
    pub temperature: f64,
    pub max_output_tokens: u32,
    pub context_window: u32,
    pub stop: Vec<String>,
    pub request_timeout_secs: u64,
    /// Extra attempts after a transport failure or 5xx response.
    pub max_retries: u32,
    /// Backoff before attempt `n` is `n * retry_backoff_ms`.
    pub retry_backoff_ms: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "qwen2.5-coder:14b".to_string(),
            endpoint: "http://localhost:11434".to_string(),
            temperature: 0.0,
            max_output_tokens: 4096,
            context_window: 8192,
            stop: vec!["User:".to_string(), "\n\nYou (type".to_string()],
            request_timeout_secs: 300,
            max_retries: 2,
            retry_backoff_ms: 500,
        }
    }
}

impl ModelConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Control loop bounds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoopConfig {
    pub max_steps: u32,
    /// Consecutive plain-text replies before the sharper nudge.
    pub nudge_threshold: u32,
    /// Conversation length that triggers compaction.
    pub max_turns: usize,
    pub keep_recent_turns: usize,
    pub result_char_limit: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_steps: 50,
            nudge_threshold: 2,
            max_turns: 40,
            keep_recent_turns: 25,
            result_char_limit: 3000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolConfig {
    pub command_timeout_secs: u64,
    /// Truncate captured command stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: 30,
            output_limit_bytes: 100_000,
        }
    }
}

impl CoderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.model.name.trim().is_empty() {
            return Err(anyhow!("model.name must be non-empty"));
        }
        if !(self.model.endpoint.starts_with("http://")
            || self.model.endpoint.starts_with("https://"))
        {
            return Err(anyhow!("model.endpoint must be an http(s) URL"));
        }
        if !self.model.temperature.is_finite() || self.model.temperature < 0.0 {
            return Err(anyhow!("model.temperature must be a finite value >= 0"));
        }
        if self.model.request_timeout_secs == 0 {
            return Err(anyhow!("model.request_timeout_secs must be > 0"));
        }
        if self.agent.max_steps == 0 {
            return Err(anyhow!("agent.max_steps must be > 0"));
        }
        if self.agent.nudge_threshold == 0 {
            return Err(anyhow!("agent.nudge_threshold must be > 0"));
        }
        if self.agent.keep_recent_turns == 0 {
            return Err(anyhow!("agent.keep_recent_turns must be > 0"));
        }
        if self.agent.max_turns <= self.agent.keep_recent_turns + 1 {
            return Err(anyhow!(
                "agent.max_turns must exceed agent.keep_recent_turns + 1"
            ));
        }
        if self.agent.result_char_limit == 0 {
            return Err(anyhow!("agent.result_char_limit must be > 0"));
        }
        if self.tools.command_timeout_secs == 0 {
            return Err(anyhow!("tools.command_timeout_secs must be > 0"));
        }
        if self.tools.output_limit_bytes == 0 {
            return Err(anyhow!("tools.output_limit_bytes must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `CoderConfig::default()`.
pub fn load_config(path: &Path) -> Result<CoderConfig> {
    if !path.exists() {
        let cfg = CoderConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: CoderConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &CoderConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
