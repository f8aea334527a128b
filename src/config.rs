//! Configuration file handling.
//!
//! Two files feed the assistant: the application settings in
//! `.loglens.toml` and the provider file (`mcp.json` by default) that
//! lists the tool servers to launch.

use crate::models::ProviderSpec;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Default application settings file name.
pub const SETTINGS_FILE: &str = ".loglens.toml";

/// Errors raised while loading or validating provider specifications.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("provider file {0} not found; create it or copy mcp.json.example")]
    NotFound(PathBuf),

    #[error("failed to read provider file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("provider file {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("provider file must contain an `mcpServers` object")]
    MissingServers,

    #[error("provider entry has an empty name")]
    EmptyName,

    #[error("provider `{name}` is missing the required `command` field")]
    MissingCommand { name: String },

    #[error("provider `{name}` has an invalid `{field}` field: expected {expected}")]
    InvalidField {
        name: String,
        field: &'static str,
        expected: &'static str,
    },
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Model settings.
    #[serde(default)]
    pub model: ModelConfig,

    /// Provider session settings.
    #[serde(default)]
    pub providers: ProviderSettings,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Path of the provider file.
    #[serde(default = "default_servers")]
    pub servers: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            servers: default_servers(),
        }
    }
}

fn default_servers() -> String {
    "mcp.json".to_string()
}

/// LLM model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model name.
    #[serde(default = "default_model")]
    pub name: String,

    /// Ollama API URL.
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,

    /// Temperature for generation.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Maximum tool-calling rounds per query.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Tool results kept in the chat context (sliding window).
    #[serde(default = "default_max_context_messages")]
    pub max_context_messages: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model(),
            ollama_url: default_ollama_url(),
            temperature: default_temperature(),
            timeout_seconds: default_timeout(),
            max_iterations: default_max_iterations(),
            max_context_messages: default_max_context_messages(),
        }
    }
}

fn default_model() -> String {
    "qwen2.5:14b".to_string()
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_temperature() -> f32 {
    0.1
}

fn default_timeout() -> u64 {
    300
}

fn default_max_iterations() -> usize {
    20
}

fn default_max_context_messages() -> usize {
    12
}

/// Settings applied to every provider session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Timeout for a single JSON-RPC request to a provider.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    30
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(SETTINGS_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// Only values the user actually passed override the file.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref servers) = args.servers {
            self.general.servers = servers.display().to_string();
        }
        if let Some(ref model) = args.model {
            self.model.name = model.clone();
        }
        if let Some(ref url) = args.ollama_url {
            self.model.ollama_url = url.clone();
        }
        if let Some(timeout) = args.timeout {
            self.model.timeout_seconds = timeout;
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Load and validate the provider file.
pub fn load_provider_file(path: &Path) -> Result<Vec<ProviderSpec>, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let value: Value = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    let specs = parse_providers(&value)?;
    debug!("Loaded {} provider entries from {}", specs.len(), path.display());
    Ok(specs)
}

/// Validate the `mcpServers` document and build specs in file order.
pub fn parse_providers(document: &Value) -> Result<Vec<ProviderSpec>, ConfigError> {
    let servers = document
        .get("mcpServers")
        .and_then(Value::as_object)
        .ok_or(ConfigError::MissingServers)?;

    servers
        .iter()
        .map(|(name, entry)| parse_entry(name, entry))
        .collect()
}

fn parse_entry(name: &str, entry: &Value) -> Result<ProviderSpec, ConfigError> {
    if name.trim().is_empty() {
        return Err(ConfigError::EmptyName);
    }

    let invalid = |field: &'static str, expected: &'static str| ConfigError::InvalidField {
        name: name.to_string(),
        field,
        expected,
    };

    let obj: &Map<String, Value> = entry.as_object().ok_or(invalid("entry", "an object"))?;

    let command = match obj.get("command") {
        None | Some(Value::Null) => {
            return Err(ConfigError::MissingCommand {
                name: name.to_string(),
            })
        }
        Some(Value::String(c)) if c.trim().is_empty() => {
            return Err(ConfigError::MissingCommand {
                name: name.to_string(),
            })
        }
        Some(Value::String(c)) => c.clone(),
        Some(_) => return Err(invalid("command", "a string")),
    };

    let args = match obj.get("args") {
        None => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| v.as_str().map(String::from))
            .collect::<Option<Vec<_>>>()
            .ok_or(invalid("args", "an array of strings"))?,
        Some(_) => return Err(invalid("args", "an array of strings")),
    };

    let env = match obj.get("env") {
        None => BTreeMap::new(),
        Some(Value::Object(vars)) => vars
            .iter()
            .map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
            .collect::<Option<BTreeMap<_, _>>>()
            .ok_or(invalid("env", "an object of strings"))?,
        Some(_) => return Err(invalid("env", "an object of strings")),
    };

    let disabled = match obj.get("disabled") {
        None => false,
        Some(Value::Bool(b)) => *b,
        Some(_) => return Err(invalid("disabled", "a boolean")),
    };

    let auto_approve = match obj.get("autoApprove") {
        None => BTreeSet::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| v.as_str().map(String::from))
            .collect::<Option<BTreeSet<_>>>()
            .ok_or(invalid("autoApprove", "an array of strings"))?,
        Some(_) => return Err(invalid("autoApprove", "an array of strings")),
    };

    Ok(ProviderSpec {
        env,
        disabled,
        auto_approve,
        ..ProviderSpec::new(name, command).with_args(args)
    })
}

/// Keep only providers that are not explicitly disabled, preserving order.
pub fn enabled_providers(specs: Vec<ProviderSpec>) -> Vec<ProviderSpec> {
    specs.into_iter().filter(|s| !s.disabled).collect()
}

/// Structural check applied again by the connection manager.
pub fn validate_spec(spec: &ProviderSpec) -> Result<(), ConfigError> {
    if spec.name.trim().is_empty() {
        return Err(ConfigError::EmptyName);
    }
    if spec.command.trim().is_empty() {
        return Err(ConfigError::MissingCommand {
            name: spec.name.clone(),
        });
    }
    Ok(())
}
