//! Configuration loading and validation for TypeClaw.
//!
//! Loads configuration from `~/.typeclaw/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use typeclaw_core::agent::{AgentConfig, UsageLimits};
use typeclaw_core::response_format::ResponseFormatMode;

/// The root configuration structure.
///
/// Maps directly to `~/.typeclaw/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL override for the default provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Default LLM provider
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Sampling temperature; the provider default applies when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_temperature: Option<f32>,

    /// Max tokens per model response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_max_tokens: Option<u32>,

    /// Run loop settings
    #[serde(default)]
    pub agent: AgentSettings,

    /// Per-run usage ceilings
    #[serde(default)]
    pub limits: UsageLimits,

    /// HTTP transport settings
    #[serde(default)]
    pub client: ClientConfig,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

fn default_provider() -> String {
    "openai".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("agent", &self.agent)
            .field("limits", &self.limits)
            .field("client", &self.client)
            .field("providers", &self.providers)
            .finish()
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

/// The `[agent]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSettings {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Default tool retry budget
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Output retry budget; falls back to `retries`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_retries: Option<u32>,

    /// "text", "native", "tool" or "prompted"
    #[serde(default = "default_output_mode")]
    pub output_mode: String,
}

fn default_max_iterations() -> u32 {
    10
}
fn default_retries() -> u32 {
    1
}
fn default_output_mode() -> String {
    "text".into()
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            retries: default_retries(),
            output_retries: None,
            output_mode: default_output_mode(),
        }
    }
}

impl AgentSettings {
    /// The structured output mode, or `None` for plain text.
    pub fn output_mode(&self) -> Result<Option<ResponseFormatMode>, ConfigError> {
        parse_output_mode(&self.output_mode)
    }
}

/// Parse an output mode name; "text" means no structured output.
pub fn parse_output_mode(mode: &str) -> Result<Option<ResponseFormatMode>, ConfigError> {
    if mode.eq_ignore_ascii_case("text") {
        return Ok(None);
    }
    mode.parse().map(Some).map_err(ConfigError::ValidationError)
}

/// The `[client]` section: transport retries and timeouts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Retries for transient transport failures (rate limits, 5xx, network)
    #[serde(default = "default_client_retries")]
    pub max_retries: u32,

    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout_secs: u64,

    /// Ceiling across all attempts of one request
    #[serde(default = "default_total_timeout")]
    pub total_timeout_secs: u64,

    /// Extra headers sent with every request
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
}

fn default_client_retries() -> u32 {
    2
}
fn default_attempt_timeout() -> u64 {
    60
}
fn default_total_timeout() -> u64 {
    300
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_retries: default_client_retries(),
            attempt_timeout_secs: default_attempt_timeout(),
            total_timeout_secs: default_total_timeout(),
            headers: HashMap::new(),
        }
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

impl AppConfig {
    /// Load configuration from the default path (~/.typeclaw/config.toml).
    ///
    /// Also checks environment variables for API keys:
    /// - `TYPECLAW_API_KEY` (highest priority)
    /// - `OPENAI_API_KEY`
    /// - `OPENROUTER_API_KEY`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides, looked up through `var`.
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(key) = var("TYPECLAW_API_KEY") {
            self.api_key = Some(key);
        } else if self.api_key.is_none() {
            self.api_key = var("OPENAI_API_KEY").or_else(|| var("OPENROUTER_API_KEY"));
        }
        if let Some(provider) = var("TYPECLAW_PROVIDER") {
            self.default_provider = provider;
        }
        if let Some(model) = var("TYPECLAW_MODEL") {
            self.default_model = model;
        }
        if let Some(url) = var("TYPECLAW_BASE_URL") {
            self.base_url = Some(url);
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".typeclaw")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(t) = self.default_temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(ConfigError::ValidationError(
                    "default_temperature must be between 0.0 and 2.0".into(),
                ));
            }
        }

        if self.agent.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_iterations must be at least 1".into(),
            ));
        }

        self.agent.output_mode()?;

        if self.client.attempt_timeout_secs == 0 || self.client.total_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "client timeouts must be greater than zero".into(),
            ));
        }

        Ok(())
    }

    /// The run loop configuration record.
    pub fn agent_config(&self) -> AgentConfig {
        AgentConfig {
            max_iterations: self.agent.max_iterations,
            retries: self.agent.retries,
            output_retries: self.agent.output_retries,
            temperature: self.default_temperature,
            max_tokens: self.default_max_tokens,
        }
    }

    /// Settings for the default provider, if configured.
    pub fn provider(&self) -> Option<&ProviderConfig> {
        self.providers.get(&self.default_provider)
    }

    /// Check if an API key is available (from config, provider section or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some() || self.provider().is_some_and(|p| p.api_key.is_some())
    }

    /// Generate a default config TOML string (for `config --init`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            default_provider: default_provider(),
            default_model: default_model(),
            default_temperature: None,
            default_max_tokens: None,
            agent: AgentSettings::default(),
            limits: UsageLimits::default(),
            client: ClientConfig::default(),
            providers: HashMap::new(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
