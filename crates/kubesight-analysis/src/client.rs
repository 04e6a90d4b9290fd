//! Streaming client for the external reasoning service

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::json;
use tokio::sync::mpsc;

use crate::config::{AnalysisConfig, Provider};
use crate::decode::{Frame, LineDecoder, parse_line};
use crate::error::{AnalysisError, Result};
use crate::prompt::Prompt;

/// Longest error body carried into an error message
const MAX_ERROR_BODY: usize = 512;

/// A service that answers a prompt with incrementally produced text
///
/// Implementations push text fragments into `tx` in the order they are
/// produced and return once the answer is complete. Dropping the returned
/// future must abandon the upstream call.
#[async_trait]
pub trait ReasoningClient: Send + Sync {
    async fn stream(&self, prompt: Prompt, tx: mpsc::Sender<String>) -> Result<()>;
}

/// HTTP client for OpenAI-compatible, Anthropic and Ollama endpoints
pub struct HttpReasoningClient {
    provider: Provider,
    model: String,
    endpoint: String,
    api_key: Option<String>,
    max_tokens: u32,
    http: reqwest::Client,
}

impl HttpReasoningClient {
    /// Create a new client from configuration
    ///
    /// Returns an error if the configuration is invalid or missing required fields.
    pub fn new(config: &AnalysisConfig) -> Result<Self> {
        if !config.enabled {
            return Err(AnalysisError::Disabled);
        }

        let api_key = config.resolve_api_key();
        if config.provider.api_key_env().is_some() && api_key.is_none() {
            return Err(AnalysisError::Config(format!(
                "analysis.api_key (or {}) is required for provider {}",
                config.provider.api_key_env().unwrap_or_default(),
                config.provider.name()
            )));
        }

        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| AnalysisError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            provider: config.provider,
            model: config.model().to_string(),
            endpoint: config.endpoint().to_string(),
            api_key,
            max_tokens: config.max_tokens,
            http,
        })
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let key = self.api_key.as_deref().unwrap_or_default();
        match self.provider {
            Provider::OpenAI => {
                headers.insert(
                    AUTHORIZATION,
                    HeaderValue::from_str(&format!("Bearer {}", key))
                        .map_err(|e| AnalysisError::Config(format!("invalid auth header: {e}")))?,
                );
            }
            Provider::Claude => {
                headers.insert(
                    "x-api-key",
                    HeaderValue::from_str(key).map_err(|e| {
                        AnalysisError::Config(format!("invalid claude api key header: {e}"))
                    })?,
                );
                headers.insert("anthropic-version", HeaderValue::from_static("2023-06-01"));
            }
            Provider::Ollama => {}
        }

        Ok(headers)
    }

    fn request_body(&self, prompt: &Prompt) -> (String, serde_json::Value) {
        match self.provider {
            Provider::OpenAI => (
                format!("{}/v1/chat/completions", self.endpoint),
                json!({
                    "model": self.model,
                    "stream": true,
                    "temperature": 0,
                    "max_tokens": self.max_tokens,
                    "messages": [
                        { "role": "system", "content": prompt.system },
                        { "role": "user", "content": prompt.user }
                    ]
                }),
            ),
            Provider::Claude => (
                format!("{}/v1/messages", self.endpoint),
                json!({
                    "model": self.model,
                    "stream": true,
                    "temperature": 0,
                    "max_tokens": self.max_tokens,
                    "system": prompt.system,
                    "messages": [{ "role": "user", "content": prompt.user }],
                }),
            ),
            Provider::Ollama => (
                format!("{}/api/generate", self.endpoint),
                json!({
                    "model": self.model,
                    "stream": true,
                    "system": prompt.system,
                    "prompt": prompt.user,
                }),
            ),
        }
    }

    /// Forward one decoded line; `Ok(false)` ends the stream
    async fn forward(&self, line: &str, tx: &mpsc::Sender<String>) -> Result<bool> {
        match parse_line(self.provider, line)? {
            Frame::Text(text) => Ok(tx.send(text).await.is_ok()),
            Frame::Done => Ok(false),
            Frame::Failed(message) => Err(AnalysisError::Upstream(message)),
            Frame::Skip => Ok(true),
        }
    }
}

#[async_trait]
impl ReasoningClient for HttpReasoningClient {
    async fn stream(&self, prompt: Prompt, tx: mpsc::Sender<String>) -> Result<()> {
        let (url, body) = self.request_body(&prompt);

        let response = self
            .http
            .post(url)
            .headers(self.headers()?)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            if body.len() > MAX_ERROR_BODY {
                let cut = (0..=MAX_ERROR_BODY)
                    .rev()
                    .find(|i| body.is_char_boundary(*i))
                    .unwrap_or(0);
                body.truncate(cut);
            }
            return Err(AnalysisError::Status {
                provider: self.provider.name(),
                status: status.as_u16(),
                body,
            });
        }

        let mut decoder = LineDecoder::default();
        let mut bytes = response.bytes_stream();

        while let Some(chunk) = bytes.next().await {
            let chunk = chunk?;
            for line in decoder.push(&chunk) {
                if !self.forward(&line, &tx).await? {
                    return Ok(());
                }
            }
        }

        if let Some(line) = decoder.finish() {
            self.forward(&line, &tx).await?;
        }

        tracing::debug!(provider = self.provider.name(), "Reasoning stream ended");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(provider: Provider) -> AnalysisConfig {
        AnalysisConfig {
            provider,
            api_key: Some("test-key".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_disabled_config_is_rejected() {
        let mut config = config(Provider::OpenAI);
        config.enabled = false;
        assert!(matches!(
            HttpReasoningClient::new(&config),
            Err(AnalysisError::Disabled)
        ));
    }

    #[test]
    fn test_request_shape_per_provider() {
        let prompt = Prompt {
            system: "sys".to_string(),
            user: "logs".to_string(),
        };

        let client = HttpReasoningClient::new(&config(Provider::Claude)).unwrap();
        let (url, body) = client.request_body(&prompt);
        assert_eq!(url, "https://api.anthropic.com/v1/messages");
        assert_eq!(body["stream"], true);
        assert_eq!(body["system"], "sys");
        assert!(client.headers().unwrap().contains_key("x-api-key"));

        let client = HttpReasoningClient::new(&config(Provider::Ollama)).unwrap();
        let (url, body) = client.request_body(&prompt);
        assert_eq!(url, "http://localhost:11434/api/generate");
        assert_eq!(body["prompt"], "logs");

        let client = HttpReasoningClient::new(&config(Provider::OpenAI)).unwrap();
        let (_, body) = client.request_body(&prompt);
        assert_eq!(body["messages"][1]["content"], "logs");
        assert!(client.headers().unwrap().contains_key(AUTHORIZATION));
    }
}
