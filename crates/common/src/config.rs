//! Configuration structures for OPML worker nodes
//!
//! This module defines all configuration types used by a worker node.
//! Configurations are loaded from YAML files and can be overridden by environment variables.

use crate::error::{NodeError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "OPML_CONFIG";

/// Config file used when `OPML_CONFIG` is unset
pub const DEFAULT_CONFIG_PATH: &str = "configs/node.yaml";

/// Top-level configuration for a worker node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Server binding address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Address advertised to the dispatcher in heartbeats
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    pub port: u16,

    /// Fixed node identifier (generated at startup when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,

    /// Base URL of the dispatcher receiving heartbeats
    pub dispatcher_url: String,

    /// Model name served by this node
    pub model_name: String,

    /// LLM runtime configuration
    pub llm: LlmEngineConfig,

    /// Deterministic re-execution configuration
    pub replay: ReplayEngineConfig,

    /// Outbound callback configuration
    #[serde(default)]
    pub callback: CallbackConfig,

    /// Heartbeat configuration
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Eviction of records that never complete (disabled when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orphan_sweep: Option<OrphanSweepConfig>,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// LLM runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmEngineConfig {
    /// Path to the llama runtime executable
    pub binary_path: PathBuf,

    /// Path to the quantized model file
    pub model_path: PathBuf,

    /// Number of tokens to predict
    #[serde(default = "default_predict_tokens")]
    pub predict_tokens: u32,

    /// Sampling temperature
    #[serde(default)]
    pub temperature: f32,

    /// Per-job deadline in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    /// Maximum concurrent jobs
    #[serde(default = "default_max_jobs")]
    pub max_jobs: usize,
}

/// Deterministic re-execution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayEngineConfig {
    /// Path to the re-execution program
    pub program_path: PathBuf,

    /// Path to the model file the VM executes
    pub model_path: PathBuf,

    /// Arguments placed before `--model`/`--prompt`
    #[serde(default)]
    pub extra_args: Vec<String>,

    /// Per-job deadline in seconds
    #[serde(default = "default_replay_timeout")]
    pub timeout_secs: u64,

    /// Maximum concurrent jobs
    #[serde(default = "default_max_jobs")]
    pub max_jobs: usize,
}

/// Outbound callback configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackConfig {
    /// Callback request timeout in seconds
    #[serde(default = "default_callback_timeout")]
    pub timeout_secs: u64,
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_callback_timeout(),
        }
    }
}

/// Heartbeat configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Seconds between heartbeats
    #[serde(default = "default_heartbeat_interval")]
    pub interval_secs: u64,

    /// Heartbeat request timeout in seconds
    #[serde(default = "default_heartbeat_timeout")]
    pub timeout_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_heartbeat_interval(),
            timeout_secs: default_heartbeat_timeout(),
        }
    }
}

/// Orphaned record sweep configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrphanSweepConfig {
    /// Records older than this are evicted
    pub ttl_secs: u64,

    /// Seconds between sweeps
    #[serde(default = "default_sweep_interval")]
    pub interval_secs: u64,
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON log lines
    #[serde(default)]
    pub structured_logging: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            structured_logging: false,
        }
    }
}

/// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_predict_tokens() -> u32 {
    256
}

fn default_llm_timeout() -> u64 {
    300
}

fn default_replay_timeout() -> u64 {
    600
}

fn default_max_jobs() -> usize {
    1
}

fn default_callback_timeout() -> u64 {
    60
}

fn default_heartbeat_interval() -> u64 {
    5
}

fn default_heartbeat_timeout() -> u64 {
    3
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

impl NodeConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| NodeError::Config(format!("Failed to read config file {}: {}", path.display(), e)))?;

        Self::from_yaml(&content)
            .map_err(|e| NodeError::Config(format!("Failed to load config file {}: {}", path.display(), e)))
    }

    /// Parse and validate configuration from YAML text
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: NodeConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the file named by `OPML_CONFIG`, then apply environment overrides
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Override selected fields from `OPML_HOST`, `OPML_PORT` and `OPML_DISPATCHER_URL`
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(host) = std::env::var("OPML_HOST") {
            self.host = host;
        }
        if let Ok(port) = std::env::var("OPML_PORT") {
            self.port = port
                .parse()
                .map_err(|_| NodeError::config(format!("Invalid port number: {}", port)))?;
        }
        if let Ok(url) = std::env::var("OPML_DISPATCHER_URL") {
            self.dispatcher_url = url;
        }
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.dispatcher_url.trim().is_empty() {
            return Err(NodeError::config("dispatcher_url must not be empty"));
        }
        if self.model_name.trim().is_empty() {
            return Err(NodeError::config("model_name must not be empty"));
        }
        if self.llm.max_jobs == 0 || self.replay.max_jobs == 0 {
            return Err(NodeError::config("max_jobs must be at least 1"));
        }
        if self.llm.timeout_secs == 0 || self.replay.timeout_secs == 0 {
            return Err(NodeError::config("engine timeout_secs must be positive"));
        }
        if self.callback.timeout_secs == 0 || self.heartbeat.timeout_secs == 0 {
            return Err(NodeError::config("request timeout_secs must be positive"));
        }
        if self.heartbeat.interval_secs == 0 {
            return Err(NodeError::config("heartbeat interval_secs must be positive"));
        }
        if let Some(sweep) = &self.orphan_sweep {
            if sweep.ttl_secs == 0 || sweep.interval_secs == 0 {
                return Err(NodeError::config("orphan_sweep ttl_secs and interval_secs must be positive"));
            }
        }
        Ok(())
    }

    /// Name this node announces in heartbeats (`host:port`)
    pub fn worker_name(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Get LLM deadline as Duration
    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm.timeout_secs)
    }

    /// Get re-execution deadline as Duration
    pub fn replay_timeout(&self) -> Duration {
        Duration::from_secs(self.replay.timeout_secs)
    }

    /// Get callback timeout as Duration
    pub fn callback_timeout(&self) -> Duration {
        Duration::from_secs(self.callback.timeout_secs)
    }

    /// Get heartbeat period as Duration
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat.interval_secs)
    }

    /// Get heartbeat timeout as Duration
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat.timeout_secs)
    }
}

impl OrphanSweepConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}
