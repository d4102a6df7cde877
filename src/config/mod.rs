use config::{Config, File};
use serde::{Deserialize, Serialize};

pub mod validator;

use crate::cli::Cli;
use crate::persistence::PersistenceConfig;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    #[serde(default)]
    pub gateway: GatewaySettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub broadcast: BroadcastSettings,
    #[serde(default)]
    pub database: PersistenceConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

/// Connection settings for the OpenClaw-style gateway.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GatewaySettings {
    /// Base URL of the gateway endpoint
    pub url: String,
    /// Timeout for general commands, in milliseconds
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    /// Timeout for status probes, in milliseconds. Must be strictly shorter
    /// than the command timeout; a health probe has to fail fast.
    #[serde(default = "default_status_timeout_ms")]
    pub status_timeout_ms: u64,
    /// Retry policy for transient failures on idempotent commands
    #[serde(default)]
    pub retry: RetrySettings,
    /// How often the background poller probes gateway status, in seconds
    #[serde(default = "default_status_poll_secs")]
    pub status_poll_secs: u64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            url: default_gateway_url(),
            command_timeout_ms: default_command_timeout_ms(),
            status_timeout_ms: default_status_timeout_ms(),
            retry: RetrySettings::default(),
            status_poll_secs: default_status_poll_secs(),
        }
    }
}

/// Bounded retry with linearly increasing delay between attempts.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RetrySettings {
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,
    /// Base delay; attempt N waits N * delay_ms
    #[serde(default = "default_retry_delay_ms")]
    pub delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_attempts(),
            delay_ms: default_retry_delay_ms(),
        }
    }
}

/// Workspace file cache policy.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CacheSettings {
    /// Maximum age a cached entry may reach before a read triggers a
    /// refresh attempt, in seconds
    #[serde(default = "default_staleness_secs")]
    pub staleness_secs: u64,
    /// Workspace files that may be read or written through this service.
    /// Any name outside this set is rejected before reaching the cache or
    /// the gateway.
    #[serde(default = "default_allowed_files")]
    pub allowed_files: Vec<String>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            staleness_secs: default_staleness_secs(),
            allowed_files: default_allowed_files(),
        }
    }
}

/// Viewer session fan-out settings.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BroadcastSettings {
    /// Per-session outbound queue depth
    #[serde(default = "default_session_buffer")]
    pub session_buffer: usize,
    /// Keep-alive ping interval, in seconds
    #[serde(default = "default_keepalive_interval_secs")]
    pub keepalive_interval_secs: u64,
    /// A session that has not answered a ping within this window is
    /// unregistered, in seconds
    #[serde(default = "default_keepalive_timeout_secs")]
    pub keepalive_timeout_secs: u64,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            session_buffer: default_session_buffer(),
            keepalive_interval_secs: default_keepalive_interval_secs(),
            keepalive_timeout_secs: default_keepalive_timeout_secs(),
        }
    }
}

fn default_gateway_url() -> String {
    "http://localhost:18789".to_string()
}

fn default_command_timeout_ms() -> u64 {
    10_000
}

fn default_status_timeout_ms() -> u64 {
    5_000
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    250
}

fn default_status_poll_secs() -> u64 {
    30
}

fn default_staleness_secs() -> u64 {
    300
}

fn default_allowed_files() -> Vec<String> {
    [
        "SOUL.md",
        "MEMORY.md",
        "AGENTS.md",
        "IDENTITY.md",
        "USER.md",
        "TOOLS.md",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_session_buffer() -> usize {
    64
}

fn default_keepalive_interval_secs() -> u64 {
    30
}

fn default_keepalive_timeout_secs() -> u64 {
    60
}

impl Settings {
    pub fn new() -> Result<Self, anyhow::Error> {
        Self::from_file("iris.toml")
    }

    /// Create settings from CLI arguments (includes config file and CLI overrides)
    pub fn new_with_cli(cli: &Cli) -> Result<Self, anyhow::Error> {
        let mut settings = Self::from_file(
            cli.config
                .to_str()
                .ok_or_else(|| anyhow::anyhow!("Config path is not valid UTF-8"))?,
        )?;

        // CLI > env vars > config file
        settings.apply_cli_overrides(cli);

        validator::ConfigValidator::validate(&settings).map_err(|errors| {
            let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            anyhow::anyhow!("Configuration validation failed:\n{}", messages.join("\n"))
        })?;

        Ok(settings)
    }

    pub fn from_file(path: &str) -> Result<Self, anyhow::Error> {
        let s = Config::builder()
            .add_source(File::with_name(path).required(false))
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 3001)?
            .build()?;

        let settings: Settings = s.try_deserialize()?;
        Ok(settings)
    }

    /// Apply CLI argument overrides to settings
    fn apply_cli_overrides(&mut self, cli: &Cli) {
        if let Some(host) = &cli.host {
            self.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.server.port = port;
        }
        if let Some(url) = &cli.gateway_url {
            self.gateway.url = url.clone();
        }
        if let Some(url) = &cli.database_url {
            self.database.url = url.clone();
        }
    }
}
