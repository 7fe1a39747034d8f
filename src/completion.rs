//! Chat-completion backends.
//!
//! A [`CompletionBackend`] turns a fully built prompt into answer text with
//! a single call: no retries, no streaming. [`OpenAiCompatible`] speaks the
//! `/chat/completions` protocol shared by OpenAI, Groq and most hosted
//! gateways; [`DisabledBackend`] always fails so answers fall back to the
//! apology.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use finops_copilot_core::prompt::SYSTEM_MESSAGE;

use crate::config::CompletionConfig;

#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Backend label for logs (e.g. the model name).
    fn name(&self) -> &str;

    async fn complete(&self, prompt: &str, max_tokens: u32, temperature: f32) -> Result<String>;
}

/// Always-failing backend used when `completion.provider = "disabled"`.
pub struct DisabledBackend;

#[async_trait]
impl CompletionBackend for DisabledBackend {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _prompt: &str, _max_tokens: u32, _temperature: f32) -> Result<String> {
        bail!("Completion provider is disabled")
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Client for an OpenAI-compatible chat-completions endpoint.
pub struct OpenAiCompatible {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl OpenAiCompatible {
    /// Reads the API key from the environment variable named by
    /// `config.api_key_env`.
    ///
    /// # Errors
    ///
    /// Returns an error if the variable is unset or empty.
    pub fn new(config: &CompletionConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| anyhow!("{} environment variable not set", config.api_key_env))?;
        Ok(Self::with_key(config, api_key))
    }

    pub fn with_key(config: &CompletionConfig, api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!(
                "{}/chat/completions",
                config.base_url.trim_end_matches('/')
            ),
            model: config.model.clone(),
            api_key,
        }
    }
}

#[async_trait]
impl CompletionBackend for OpenAiCompatible {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str, max_tokens: u32, temperature: f32) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: SYSTEM_MESSAGE,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            max_tokens,
            temperature,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Completion request to {} failed", self.endpoint))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("Completion API error {}: {}", status, text);
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .context("Invalid completion response")?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| anyhow!("Completion response has no content"))
    }
}

/// Creates the backend selected by `config.provider`.
pub fn create_backend(config: &CompletionConfig) -> Result<Box<dyn CompletionBackend>> {
    match config.provider.as_str() {
        "openai" => Ok(Box::new(OpenAiCompatible::new(config)?)),
        "disabled" => Ok(Box::new(DisabledBackend)),
        other => bail!("Unknown completion provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: &str) -> CompletionConfig {
        CompletionConfig {
            base_url: base_url.to_string(),
            ..CompletionConfig::default()
        }
    }

    #[tokio::test]
    async fn test_complete_sends_system_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(serde_json::json!({
                "model": "llama-3.3-70b-versatile",
                "max_tokens": 500,
                "messages": [
                    {"role": "system", "content": "You are a helpful FinOps assistant."},
                    {"role": "user", "content": "hello"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": " Hi there. "}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let backend = OpenAiCompatible::with_key(&config(&server.uri()), "test-key".into());
        let answer = backend.complete("hello", 500, 0.2).await.unwrap();
        assert_eq!(answer, "Hi there.");
    }

    #[tokio::test]
    async fn test_error_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let backend = OpenAiCompatible::with_key(&config(&server.uri()), "nope".into());
        let err = backend.complete("hello", 10, 0.0).await.unwrap_err();
        assert!(err.to_string().contains("401"));
    }

    #[tokio::test]
    async fn test_empty_choices_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})),
            )
            .mount(&server)
            .await;

        let backend = OpenAiCompatible::with_key(&config(&server.uri()), "k".into());
        assert!(backend.complete("hello", 10, 0.0).await.is_err());
    }

    #[test]
    fn test_missing_key_is_fatal() {
        let config = CompletionConfig {
            api_key_env: "FINOPS_COPILOT_TEST_UNSET_KEY".to_string(),
            ..CompletionConfig::default()
        };
        let err = create_backend(&config).err().unwrap();
        assert!(err.to_string().contains("FINOPS_COPILOT_TEST_UNSET_KEY"));
    }

    #[tokio::test]
    async fn test_disabled_backend_fails() {
        let backend = create_backend(&CompletionConfig {
            provider: "disabled".into(),
            ..CompletionConfig::default()
        })
        .unwrap();
        assert!(backend.complete("x", 1, 0.0).await.is_err());
    }
}
