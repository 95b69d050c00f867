//! Provider router: selects the configured provider.
//!
//! Handles provider creation from `AppConfig` and lookup by name.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use typeclaw_config::{AppConfig, ClientConfig};
use typeclaw_core::error::ProviderError;
use typeclaw_core::provider::Provider;

use crate::openai_compat::{OpenAiCompatProvider, RetryPolicy};

/// Holds the configured providers by name.
pub struct ProviderRouter {
    providers: HashMap<String, Arc<dyn Provider>>,
    default_provider: String,
}

impl ProviderRouter {
    /// Create a new router with a default provider.
    pub fn new(default_provider: impl Into<String>) -> Self {
        Self {
            providers: HashMap::new(),
            default_provider: default_provider.into(),
        }
    }

    /// Register a provider.
    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.insert(name.into(), provider);
    }

    /// Get the default provider.
    pub fn default_provider(&self) -> Result<Arc<dyn Provider>, ProviderError> {
        self.get(&self.default_provider)
            .ok_or_else(|| ProviderError::NotConfigured(self.default_provider.clone()))
    }

    /// Get a specific provider by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }

    /// List all registered provider names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

/// Build providers from configuration.
///
/// Every `[providers.<name>]` section becomes an OpenAI-compatible provider,
/// and the default provider is always registered. The top-level `base_url`
/// (or `TYPECLAW_BASE_URL`) overrides the default provider's endpoint.
pub fn build_from_config(config: &AppConfig) -> Result<ProviderRouter, ProviderError> {
    let mut router = ProviderRouter::new(&config.default_provider);
    let retry = retry_policy(&config.client);

    let mut names: Vec<&String> = config.providers.keys().collect();
    if !config.providers.contains_key(&config.default_provider) {
        names.push(&config.default_provider);
    }

    for name in names {
        let section = config.providers.get(name);
        let api_key = section
            .and_then(|p| p.api_key.clone())
            .or_else(|| config.api_key.clone())
            .unwrap_or_default();

        let override_url = if *name == config.default_provider {
            config.base_url.clone()
        } else {
            None
        };
        let base_url = override_url
            .or_else(|| section.and_then(|p| p.api_url.clone()))
            .or_else(|| default_base_url(name).map(String::from))
            .ok_or_else(|| ProviderError::NotConfigured(format!("no api_url configured for provider \"{name}\"")))?;

        let provider = OpenAiCompatProvider::new(name.as_str(), base_url, api_key)
            .with_retry_policy(retry.clone())
            .with_headers(config.client.headers.clone());
        router.register(name.clone(), Arc::new(provider));
    }

    Ok(router)
}

fn retry_policy(client: &ClientConfig) -> RetryPolicy {
    RetryPolicy {
        max_retries: client.max_retries,
        attempt_timeout: Duration::from_secs(client.attempt_timeout_secs),
        total_timeout: Duration::from_secs(client.total_timeout_secs),
        ..RetryPolicy::default()
    }
}

/// Get the default base URL for well-known providers.
fn default_base_url(provider_name: &str) -> Option<&'static str> {
    let url = match provider_name {
        "openai" => "https://api.openai.com/v1",
        "openrouter" => "https://openrouter.ai/api/v1",
        "ollama" => "http://localhost:11434/v1",
        "deepseek" => "https://api.deepseek.com/v1",
        "groq" => "https://api.groq.com/openai/v1",
        "together" => "https://api.together.xyz/v1",
        "fireworks" => "https://api.fireworks.ai/inference/v1",
        "vllm" => "http://localhost:8000/v1",
        "llamacpp" | "llama.cpp" => "http://localhost:8080/v1",
        _ => return None,
    };
    Some(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use typeclaw_config::ProviderConfig;

    #[test]
    fn router_register_and_lookup() {
        let mut router = ProviderRouter::new("openrouter");
        router.register("openrouter", Arc::new(OpenAiCompatProvider::openrouter("sk-test")));

        assert!(router.get("openrouter").is_some());
        assert!(router.get("nonexistent").is_none());
        assert!(router.default_provider().is_ok());
    }

    #[test]
    fn default_base_urls() {
        assert!(default_base_url("openrouter").unwrap().contains("openrouter.ai"));
        assert!(default_base_url("openai").unwrap().contains("api.openai.com"));
        assert!(default_base_url("ollama").unwrap().contains("localhost:11434"));
        assert!(default_base_url("mystery").is_none());
    }

    #[test]
    fn build_from_default_config() {
        let router = build_from_config(&AppConfig::default()).unwrap();
        assert_eq!(router.default_provider().unwrap().name(), "openai");
    }

    #[test]
    fn configured_sections_are_registered() {
        let mut config = AppConfig::default();
        config.providers.insert(
            "local".into(),
            ProviderConfig {
                api_url: Some("http://localhost:9000/v1".into()),
                ..ProviderConfig::default()
            },
        );
        let router = build_from_config(&config).unwrap();
        assert_eq!(router.list(), vec!["local", "openai"]);
    }

    #[test]
    fn unknown_provider_without_url_is_rejected() {
        let config = AppConfig {
            default_provider: "mystery".into(),
            ..AppConfig::default()
        };
        assert!(matches!(build_from_config(&config), Err(ProviderError::NotConfigured(_))));

        let config = AppConfig {
            default_provider: "mystery".into(),
            base_url: Some("http://localhost:1234/v1".into()),
            ..AppConfig::default()
        };
        assert!(build_from_config(&config).is_ok());
    }
}
