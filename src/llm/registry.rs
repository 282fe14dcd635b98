//! Provider selection, resolved once at startup

use super::{AnthropicService, GeminiService, LlmService, LoggingService, OpenAIService};
use crate::config::{ConfigError, Lookup};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// LLM provider enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    Anthropic,
    OpenAI,
    Gemini,
}

impl Provider {
    /// Get the display name for this provider
    pub fn display_name(self) -> &'static str {
        match self {
            Provider::Anthropic => "Anthropic",
            Provider::OpenAI => "OpenAI",
            Provider::Gemini => "Gemini",
        }
    }

    /// Get the environment variable name for this provider's API key
    pub fn api_key_env_var(self) -> &'static str {
        match self {
            Provider::Anthropic => "ANTHROPIC_API_KEY",
            Provider::OpenAI => "OPENAI_API_KEY",
            Provider::Gemini => "GEMINI_API_KEY",
        }
    }

    /// Get the environment variable name for this provider's model id
    pub fn model_env_var(self) -> &'static str {
        match self {
            Provider::Anthropic => "ANTHROPIC_MODEL",
            Provider::OpenAI => "OPENAI_MODEL",
            Provider::Gemini => "GEMINI_MODEL",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for Provider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anthropic" | "claude" => Ok(Provider::Anthropic),
            "openai" => Ok(Provider::OpenAI),
            "gemini" | "google" => Ok(Provider::Gemini),
            other => Err(ConfigError::UnknownProvider(other.to_string())),
        }
    }
}

/// Configuration for the selected LLM provider
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: Provider,
    pub api_key: Option<String>,
    pub model: String,
    /// Override for the provider endpoint base (`OpenAI`-compatible servers)
    pub base_url: Option<String>,
    pub timeout: Duration,
}

impl LlmConfig {
    pub fn from_lookup(lookup: &Lookup<'_>) -> Result<Self, ConfigError> {
        let provider = match lookup("LLM_PROVIDER") {
            Some(raw) => raw.parse()?,
            None => Provider::Anthropic,
        };

        let api_key = lookup(provider.api_key_env_var()).filter(|k| !k.trim().is_empty());
        let base_url = match provider {
            Provider::OpenAI => lookup("OPENAI_BASE_URL").filter(|u| !u.trim().is_empty()),
            Provider::Anthropic | Provider::Gemini => None,
        };

        // A custom OpenAI-compatible endpoint may run without a key
        let key_optional = provider == Provider::OpenAI && base_url.is_some();
        if api_key.is_none() && !key_optional {
            return Err(ConfigError::Missing(provider.api_key_env_var()));
        }

        let model = lookup(provider.model_env_var())
            .filter(|m| !m.trim().is_empty())
            .ok_or(ConfigError::Missing(provider.model_env_var()))?;

        let timeout_secs = crate::config::parse_or(lookup, "LLM_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS)?;

        Ok(Self {
            provider,
            api_key,
            model,
            base_url,
            timeout: Duration::from_secs(timeout_secs.max(1)),
        })
    }
}

/// Build the single provider service for this process, wrapped with logging
pub fn create_service(config: &LlmConfig) -> Result<Arc<dyn LlmService>, ConfigError> {
    let base_url = config.base_url.as_deref();
    let service: Arc<dyn LlmService> = match config.provider {
        Provider::Anthropic => Arc::new(AnthropicService::new(
            config.api_key.clone().unwrap_or_default(),
            config.model.clone(),
            base_url,
            config.timeout,
        )?),
        Provider::OpenAI => Arc::new(OpenAIService::new(
            config.api_key.clone(),
            config.model.clone(),
            base_url,
            config.timeout,
        )?),
        Provider::Gemini => Arc::new(GeminiService::new(
            config.api_key.clone().unwrap_or_default(),
            config.model.clone(),
            base_url,
            config.timeout,
        )?),
    };

    tracing::info!(
        provider = %config.provider,
        model = %config.model,
        timeout_secs = config.timeout.as_secs(),
        "LLM provider initialized"
    );

    Ok(Arc::new(LoggingService::new(service)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_to_anthropic() {
        let lookup = lookup_from(&[
            ("ANTHROPIC_API_KEY", "test-key"),
            ("ANTHROPIC_MODEL", "claude-haiku"),
        ]);
        let config = LlmConfig::from_lookup(&lookup).unwrap();
        assert_eq!(config.provider, Provider::Anthropic);
        assert_eq!(config.model, "claude-haiku");
        assert_eq!(config.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
    }

    #[test]
    fn test_missing_key_is_error() {
        let lookup = lookup_from(&[("LLM_PROVIDER", "gemini"), ("GEMINI_MODEL", "gemini-pro")]);
        let err = LlmConfig::from_lookup(&lookup).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("GEMINI_API_KEY")));
    }

    #[test]
    fn test_missing_model_is_error() {
        let lookup = lookup_from(&[("LLM_PROVIDER", "OpenAI"), ("OPENAI_API_KEY", "k")]);
        let err = LlmConfig::from_lookup(&lookup).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("OPENAI_MODEL")));
    }

    #[test]
    fn test_openai_compatible_without_key() {
        let lookup = lookup_from(&[
            ("LLM_PROVIDER", "openai"),
            ("OPENAI_BASE_URL", "http://127.0.0.1:11434/v1"),
            ("OPENAI_MODEL", "llama3"),
        ]);
        let config = LlmConfig::from_lookup(&lookup).unwrap();
        assert!(config.api_key.is_none());
        assert!(create_service(&config).is_ok());
    }

    #[test]
    fn test_unknown_provider() {
        let lookup = lookup_from(&[("LLM_PROVIDER", "carrier-pigeon")]);
        let err = LlmConfig::from_lookup(&lookup).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownProvider(p) if p == "carrier-pigeon"));
    }

    #[test]
    fn test_create_service_reports_model() {
        let lookup = lookup_from(&[
            ("LLM_PROVIDER", "gemini"),
            ("GEMINI_API_KEY", "k"),
            ("GEMINI_MODEL", "gemini-2.0-flash"),
        ]);
        let service = create_service(&LlmConfig::from_lookup(&lookup).unwrap()).unwrap();
        assert_eq!(service.model_id(), "gemini-2.0-flash");
    }
}
