//! Environment configuration

use crate::runtime::{SessionConfig, DEFAULT_MAX_TOOL_ROUNDS, DEFAULT_MODEL};
use crate::system_prompt::{build_system_prompt, DEFAULT_SYSTEM_PROMPT};
use serde_json::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

const ENV_PREFIX: &str = "PANEL_ASSISTANT_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("system prompt must not be empty")]
    EmptySystemPrompt,
    #[error("invalid payload pattern: {0}")]
    InvalidPayloadPattern(#[from] regex::Error),
    #[error("max tool rounds must be at least 1")]
    ZeroToolRounds,
    #[error("invalid value for {name}: {value:?}")]
    InvalidValue { name: String, value: String },
    #[error("failed to read context file {path}: {source}")]
    ContextRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("context file {path} is not valid JSON: {source}")]
    ContextParse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Connection settings for the chat backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    pub base_url: String,
    /// Bearer token, passed through untouched
    pub api_key: Option<String>,
    /// When false the backend reports itself unavailable
    pub enabled: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssistantConfig {
    pub backend: BackendConfig,
    pub model: String,
    pub system_prompt: String,
    /// Regular expression describing the relevant part of the content payload
    pub payload_pattern: Option<String>,
    pub max_tool_rounds: u32,
    /// JSON dashboard/panel context submitted on start
    pub context_path: Option<PathBuf>,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            model: DEFAULT_MODEL.to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            payload_pattern: None,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            context_path: None,
        }
    }
}

impl AssistantConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from `PANEL_ASSISTANT_*` variables resolved through `lookup`.
    /// Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}")).filter(|v| !v.trim().is_empty())
        };
        let defaults = Self::default();

        let enabled = match get("ENABLED") {
            Some(value) => parse_flag("ENABLED", &value)?,
            None => defaults.backend.enabled,
        };
        let max_tool_rounds = match get("MAX_TOOL_ROUNDS") {
            Some(value) => value
                .trim()
                .parse()
                .map_err(|_| invalid_value("MAX_TOOL_ROUNDS", &value))?,
            None => defaults.max_tool_rounds,
        };

        Ok(Self {
            backend: BackendConfig {
                base_url: get("BASE_URL").unwrap_or(defaults.backend.base_url),
                api_key: get("API_KEY"),
                enabled,
            },
            model: get("MODEL").unwrap_or(defaults.model),
            system_prompt: lookup(&format!("{ENV_PREFIX}SYSTEM_PROMPT"))
                .unwrap_or(defaults.system_prompt),
            payload_pattern: get("PAYLOAD_REGEX"),
            max_tool_rounds,
            context_path: get("CONTEXT").map(PathBuf::from),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.system_prompt.trim().is_empty() {
            return Err(ConfigError::EmptySystemPrompt);
        }
        if let Some(pattern) = &self.payload_pattern {
            regex::Regex::new(pattern)?;
        }
        if self.max_tool_rounds == 0 {
            return Err(ConfigError::ZeroToolRounds);
        }
        Ok(())
    }

    /// Session settings without any initial context
    pub fn session_config(&self) -> SessionConfig {
        let prompt = build_system_prompt(&self.system_prompt, self.payload_pattern.as_deref());
        SessionConfig::new(prompt)
            .with_model(self.model.clone())
            .with_max_tool_rounds(self.max_tool_rounds)
    }
}

/// Read a dashboard/panel context object from a JSON file
pub fn load_context(path: &Path) -> Result<Value, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::ContextRead {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::ContextParse {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_flag(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid_value(name, value)),
    }
}

fn invalid_value(name: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        name: format!("{ENV_PREFIX}{name}"),
        value: value.to_string(),
    }
}
