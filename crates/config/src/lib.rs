//! Configuration management for waypoint
//!
//! Loads agent, backend and server settings from `~/.waypoint/config.json`
//! and layers environment overrides on top.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

pub mod paths;

pub use paths::{config_path, data_dir};

/// Errors in configuration handling
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config not found: {0}")]
    NotFound(PathBuf),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Upper bound on tool rounds used when the configured value is unusable
pub const DEFAULT_MAX_TOOL_LOOPS: u32 = 4;

/// Agent loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefaults {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Signed so that non-positive values survive parsing and fall back later
    #[serde(default = "default_max_tool_loops")]
    pub max_tool_loops: i64,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub think: bool,
    #[serde(default)]
    pub show_thoughts: bool,
    #[serde(default)]
    pub show_tool_results: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_threads: Option<u32>,
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            name: default_name(),
            model: default_model(),
            max_tool_loops: default_max_tool_loops(),
            stream: false,
            think: false,
            show_thoughts: false,
            show_tool_results: false,
            timeout_secs: default_timeout_secs(),
            num_threads: None,
        }
    }
}

fn default_name() -> String {
    "Waypoint".to_string()
}

fn default_model() -> String {
    "llama3.2".to_string()
}

fn default_max_tool_loops() -> i64 {
    DEFAULT_MAX_TOOL_LOOPS as i64
}

fn default_timeout_secs() -> u64 {
    600
}

/// Ollama backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:11434".to_string()
}

/// A skill advertised on this agent's card
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SkillConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Remote agent protocol server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_description")]
    pub description: String,
    #[serde(default = "default_skills")]
    pub skills: Vec<SkillConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            description: default_description(),
            skills: default_skills(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    10003
}

fn default_description() -> String {
    "A simple agent that can assist with geographic queries.".to_string()
}

fn default_skills() -> Vec<SkillConfig> {
    vec![SkillConfig {
        id: "find-a-place".to_string(),
        name: "Find a Place".to_string(),
        description: "Find a place by name or location.".to_string(),
        tags: vec!["geography".to_string(), "location".to_string()],
    }]
}

/// Root configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub agent: AgentDefaults,
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub server: ServerConfig,
    /// Base URLs of remote agents whose skills become tools
    #[serde(default)]
    pub remotes: Vec<String>,
}

impl Config {
    /// Load from the default location and apply environment overrides
    pub async fn load() -> Result<Self> {
        let path = config_path();
        let mut config = Self::load_from(&path).await?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load from specific location
    pub async fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("no config found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        debug!("reading config from {:?}", path);
        let content = tokio::fs::read_to_string(path).await?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save to the default location
    pub async fn save(&self) -> Result<()> {
        let path = config_path();
        self.save_to(&path).await
    }

    /// Save to specific location
    pub async fn save_to(&self, path: &Path) -> Result<()> {
        debug!("writing config to {:?}", path);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// Layer environment overrides on top of the file values.
    ///
    /// Each setting also answers to the older variable name listed after it
    /// in [`ENV_ALIASES`]. `lookup` is usually `std::env::var`; tests pass a map.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| {
            lookup(key).or_else(|| {
                ENV_ALIASES
                    .iter()
                    .find(|(name, _)| *name == key)
                    .and_then(|(_, alias)| lookup(alias))
            })
        };

        if let Some(url) = lookup("OLLAMA_BASE_URL").filter(|v| !v.is_empty()) {
            self.ollama.base_url = url;
        }
        if let Some(model) = lookup("WAYPOINT_MODEL").filter(|v| !v.is_empty()) {
            self.agent.model = model;
        }
        if let Some(threads) = lookup("OLLAMA_NUM_THREADS").and_then(|v| v.trim().parse().ok()) {
            self.agent.num_threads = Some(threads);
        }
        if let Some(raw) = lookup("WAYPOINT_MAX_TOOL_LOOPS") {
            match raw.trim().parse::<i64>() {
                Ok(loops) => self.agent.max_tool_loops = loops,
                Err(_) => warn!("ignoring WAYPOINT_MAX_TOOL_LOOPS={:?}", raw),
            }
        }
        if let Some(port) = lookup("WAYPOINT_PORT").and_then(|v| v.trim().parse().ok()) {
            self.server.port = port;
        }
        if let Some(v) = lookup("WAYPOINT_STREAM") {
            self.agent.stream = env_flag(&v);
        }
        if let Some(v) = lookup("WAYPOINT_THINK") {
            self.agent.think = env_flag(&v);
        }
        if let Some(v) = lookup("WAYPOINT_SHOW_THOUGHTS") {
            self.agent.show_thoughts = env_flag(&v);
        }
        if let Some(v) = lookup("WAYPOINT_SHOW_TOOL_RESULTS") {
            self.agent.show_tool_results = env_flag(&v);
        }
    }

    /// Tool round bound; non-positive values fall back to the default
    pub fn max_tool_loops(&self) -> u32 {
        match self.agent.max_tool_loops {
            n if n <= 0 => DEFAULT_MAX_TOOL_LOOPS,
            n => u32::try_from(n).unwrap_or(u32::MAX),
        }
    }

    /// Hard per-call timeout for the chat transport
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.agent.timeout_secs.max(1))
    }

    /// Public URL of this agent when served
    pub fn server_url(&self) -> String {
        format!("http://{}:{}/", self.server.host, self.server.port)
    }
}

/// Older variable names still honoured, as `(name, alias)`; the name wins
/// when both are set
pub const ENV_ALIASES: &[(&str, &str)] = &[
    ("WAYPOINT_MAX_TOOL_LOOPS", "MAX_TOOL_CALL_LOOPS_FOR_USERINPUT"),
    ("WAYPOINT_STREAM", "ENABLE_STREAM"),
    ("WAYPOINT_THINK", "ENABLE_THINKING"),
    ("WAYPOINT_SHOW_THOUGHTS", "SHOW_THOUGHTS"),
    ("WAYPOINT_SHOW_TOOL_RESULTS", "AGENT_WITH_TOOLS_SHOW_RESPONSES"),
    ("WAYPOINT_PORT", "AGENT_ATHUR_PORT"),
];

/// Only the case-insensitive string "true" enables a flag
pub fn env_flag(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("true")
}

/// Write a default config if none exists and return the effective config
pub async fn init() -> Result<Config> {
    let config_path = config_path();

    if config_path.exists() {
        warn!("config already exists at {:?}", config_path);
    } else {
        let config = Config::default();
        config.save().await?;
        info!("config written to {:?}", config_path);
    }

    Config::load().await
}
