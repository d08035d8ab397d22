//! Configuration file handling

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::paths::config_path;
use super::{Error, Result};
use crate::mcp::session::LaunchSpec;
use crate::mcp::types::HandshakeParams;
use crate::script::{ParamSchema, Value};

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Server under test
    #[serde(default)]
    pub server: ServerConfig,

    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// MCP initialize handshake
    #[serde(default)]
    pub handshake: HandshakeConfig,

    /// Failure policy defaults
    #[serde(default)]
    pub runner: RunnerConfig,

    /// Caller-supplied variables available as `${name}`
    #[serde(default)]
    pub variables: BTreeMap<String, serde_json::Value>,

    /// Per-tool parameter types, keyed by tool name
    #[serde(default)]
    pub schema: BTreeMap<String, ToolSchemaConfig>,
}

/// How to launch the server under test
#[derive(Debug, Deserialize, Default, Clone)]
pub struct ServerConfig {
    /// Executable name or path
    pub command: Option<String>,

    /// Arguments passed to the server
    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory for the server process
    pub cwd: Option<PathBuf>,

    /// Extra environment variables for the server process
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl ServerConfig {
    /// Overlay another server section on top of this one
    ///
    /// Fields set in `other` win; empty fields leave ours alone.
    pub fn merge(&mut self, other: &ServerConfig) {
        if other.command.is_some() {
            self.command = other.command.clone();
            self.args = other.args.clone();
        } else if !other.args.is_empty() {
            self.args = other.args.clone();
        }
        if other.cwd.is_some() {
            self.cwd = other.cwd.clone();
        }
        for (key, value) in &other.env {
            self.env.insert(key.clone(), value.clone());
        }
    }

    /// Build a launch spec, resolving bare command names through PATH
    pub fn launch_spec(&self) -> Result<LaunchSpec> {
        let command = self.command.as_deref().ok_or_else(|| {
            Error::Config(
                "No server command configured. Pass --server <cmd> or set [server] command"
                    .to_string(),
            )
        })?;

        Ok(LaunchSpec {
            program: resolve_command(command),
            args: self.args.clone(),
            cwd: self.cwd.clone(),
            env: self.env.clone(),
        })
    }
}

/// Commands containing a path separator are used as-is; bare names are
/// looked up in PATH and left untouched if not found (spawn reports it).
fn resolve_command(command: &str) -> PathBuf {
    if command.contains(std::path::MAIN_SEPARATOR) || command.contains('/') {
        return PathBuf::from(command);
    }
    which::which(command).unwrap_or_else(|_| PathBuf::from(command))
}

/// Timeout settings
#[derive(Debug, Deserialize)]
pub struct Timeouts {
    /// How long a freshly spawned server must stay alive to count as started
    #[serde(default = "default_startup_grace")]
    pub startup_grace_ms: u64,

    /// Per-request response timeout
    #[serde(default = "default_request")]
    pub request_secs: u64,

    /// Wait between graceful termination and a forced kill
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            startup_grace_ms: default_startup_grace(),
            request_secs: default_request(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

impl Timeouts {
    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }

    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

fn default_startup_grace() -> u64 {
    500
}
fn default_request() -> u64 {
    10
}
fn default_shutdown_grace() -> u64 {
    5
}

/// MCP handshake settings
#[derive(Debug, Deserialize, Clone)]
pub struct HandshakeConfig {
    /// Send `initialize` + `notifications/initialized` before the first step
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,

    #[serde(default = "default_client_name")]
    pub client_name: String,

    #[serde(default = "default_client_version")]
    pub client_version: String,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            protocol_version: default_protocol_version(),
            client_name: default_client_name(),
            client_version: default_client_version(),
        }
    }
}

impl HandshakeConfig {
    /// Params for the `initialize` request, or `None` when disabled
    pub fn params(&self) -> Option<HandshakeParams> {
        self.enabled.then(|| HandshakeParams {
            protocol_version: self.protocol_version.clone(),
            client_name: self.client_name.clone(),
            client_version: self.client_version.clone(),
        })
    }
}

fn default_true() -> bool {
    true
}
fn default_protocol_version() -> String {
    "2024-11-05".to_string()
}
fn default_client_name() -> String {
    "mcp-probe".to_string()
}
fn default_client_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

/// Runner policy defaults
#[derive(Debug, Deserialize, Default, Clone, Copy)]
pub struct RunnerConfig {
    /// Keep executing after a failed step (connection loss still aborts)
    #[serde(default)]
    pub keep_going: bool,

    /// Treat `result.isError == true` as a failed step
    #[serde(default)]
    pub fail_on_is_error: bool,
}

/// Declared parameter types for one tool
#[derive(Debug, Deserialize, Default, Clone)]
pub struct ToolSchemaConfig {
    #[serde(default)]
    pub integer_fields: Vec<String>,
}

impl Config {
    /// Load configuration
    ///
    /// An explicit path must exist. Without one, the default config file is
    /// used if present, otherwise built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_file(path),
            None => match config_path() {
                Some(path) if path.exists() => Self::load_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    fn load_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::ConfigParse(e.to_string()))
    }

    /// Integer-typed parameter declarations from the `[schema]` section
    pub fn param_schema(&self) -> ParamSchema {
        let mut schema = ParamSchema::new();
        for (tool, declared) in &self.schema {
            for field in &declared.integer_fields {
                schema.declare_integer(tool, field);
            }
        }
        schema
    }

    /// Caller variables converted to script values
    pub fn script_variables(&self) -> BTreeMap<String, Value> {
        self.variables
            .iter()
            .map(|(name, value)| (name.clone(), Value::from(value.clone())))
            .collect()
    }
}
