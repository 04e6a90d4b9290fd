//! Reasoning service configuration

use serde::Deserialize;

/// Supported reasoning service dialects
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    OpenAI,
    Claude,
    Ollama,
}

impl Provider {
    /// Returns the default endpoint for this provider
    pub fn default_endpoint(&self) -> &'static str {
        match self {
            Provider::OpenAI => "https://api.openai.com",
            Provider::Claude => "https://api.anthropic.com",
            Provider::Ollama => "http://localhost:11434",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::OpenAI => "gpt-4o-mini",
            Provider::Claude => "claude-3-5-haiku-latest",
            Provider::Ollama => "llama3.1",
        }
    }

    /// Environment variable consulted when no key is configured
    pub fn api_key_env(&self) -> Option<&'static str> {
        match self {
            Provider::OpenAI => Some("OPENAI_API_KEY"),
            Provider::Claude => Some("ANTHROPIC_API_KEY"),
            Provider::Ollama => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Provider::OpenAI => "openai",
            Provider::Claude => "claude",
            Provider::Ollama => "ollama",
        }
    }
}

/// `[analysis]` section of the config file
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AnalysisConfig {
    pub enabled: bool,
    pub provider: Provider,
    /// Model to use (defaults per provider)
    pub model: Option<String>,
    /// API endpoint (defaults per provider)
    pub endpoint: Option<String>,
    /// API key (can also use env var)
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub max_tokens: u32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: Provider::default(),
            model: None,
            endpoint: None,
            api_key: None,
            timeout_secs: 120,
            max_tokens: 1024,
        }
    }
}

impl AnalysisConfig {
    pub fn model(&self) -> &str {
        self.model
            .as_deref()
            .unwrap_or_else(|| self.provider.default_model())
    }

    pub fn endpoint(&self) -> &str {
        self.endpoint
            .as_deref()
            .unwrap_or_else(|| self.provider.default_endpoint())
            .trim_end_matches('/')
    }

    /// Configured key, else the provider's environment variable
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key.clone().or_else(|| {
            self.provider
                .api_key_env()
                .and_then(|var| std::env::var(var).ok())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_per_provider() {
        let config: AnalysisConfig = from_json(r#"{"provider":"ollama"}"#);
        assert_eq!(config.provider, Provider::Ollama);
        assert_eq!(config.endpoint(), "http://localhost:11434");
        assert_eq!(config.model(), "llama3.1");
        assert!(config.enabled);
    }

    #[test]
    fn test_explicit_endpoint_is_trimmed() {
        let config: AnalysisConfig =
            from_json(r#"{"provider":"claude","endpoint":"http://proxy:8080/","model":"m"}"#);
        assert_eq!(config.endpoint(), "http://proxy:8080");
        assert_eq!(config.model(), "m");
    }

    fn from_json(json: &str) -> AnalysisConfig {
        serde_json::from_str(json).unwrap()
    }
}
