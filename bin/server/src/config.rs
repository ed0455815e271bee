//! Centralized server configuration.
//!
//! This module provides strongly-typed configuration for the server,
//! loaded via the `config` crate from environment variables.
//!
//! Engine tuning lives in [`EngineConfig`](amber_loom_workflow::EngineConfig)
//! and NATS settings in [`NatsConfig`](amber_loom_workflow::nats::NatsConfig);
//! both are composed here rather than redeclared.

use amber_loom_workflow::EngineConfig;
use amber_loom_workflow::nats::NatsConfig;
use serde::Deserialize;

/// Server configuration composed from library configs.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// PostgreSQL database connection URL.
    pub database_url: String,

    /// HTTP listener configuration.
    #[serde(default)]
    pub http: HttpConfig,

    /// Progress stream connection. When absent, progress events are
    /// logged but not published anywhere.
    #[serde(default)]
    pub nats: Option<NatsConfig>,

    /// Agent runner backend.
    #[serde(default = "default_agent_runner")]
    pub agents: RunnerConfig,

    /// Tool runner backend.
    #[serde(default = "default_tool_runner")]
    pub tools: RunnerConfig,

    /// Engine tuning knobs.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Optional JSON file of workflow definitions inserted at boot when
    /// not already present (`SEED_WORKFLOWS_PATH`). This server has no
    /// editing endpoints, so deployments seed their definitions here.
    #[serde(default)]
    pub seed_workflows_path: Option<String>,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Address the API listens on.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

/// Connection settings for one invocation backend.
#[derive(Debug, Clone, Deserialize)]
pub struct RunnerConfig {
    /// Base URL of the runner service.
    pub base_url: String,

    /// Per-request timeout in seconds. Agent invocations can run long,
    /// so this bounds a single remote call, not the whole workflow.
    #[serde(default = "default_runner_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_bind_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_runner_timeout_seconds() -> u64 {
    120
}

fn default_agent_runner() -> RunnerConfig {
    RunnerConfig {
        base_url: "http://127.0.0.1:8090".to_string(),
        timeout_seconds: default_runner_timeout_seconds(),
    }
}

fn default_tool_runner() -> RunnerConfig {
    RunnerConfig {
        base_url: "http://127.0.0.1:8091".to_string(),
        timeout_seconds: default_runner_timeout_seconds(),
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    ///
    /// Nested fields use `__` as the separator, so `HTTP__BIND_ADDR` sets
    /// [`HttpConfig::bind_addr`] and `ENGINE__MAX_NODE_VISITS` sets the
    /// engine's cycle guard.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
