//! Text-generation client
//!
//! Key design: every call is a single blocking round trip. The client keeps
//! no conversation state, never retries, and every failure (network, rate
//! limit, timeout, service error) surfaces as `SluiceError::Generation`.

use crate::auth;
use crate::circuit_breaker::CircuitBreaker;
use crate::types::{AnthropicRequest, AnthropicResponse, Conversation, Model};
use async_trait::async_trait;
use sluice_core::config::GenerationConfig;
use sluice_core::{Result, SluiceError};
use std::sync::OnceLock;
use std::time::Duration;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

// Process-wide breaker shared by every client instance
static CIRCUIT_BREAKER: OnceLock<CircuitBreaker> = OnceLock::new();

fn get_circuit_breaker() -> &'static CircuitBreaker {
    CIRCUIT_BREAKER.get_or_init(CircuitBreaker::default)
}

/// Single-call abstraction over the external generation service
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Run one round trip and return the generated text
    async fn generate(
        &self,
        system_prompt: &str,
        conversation: &Conversation,
        max_tokens: usize,
    ) -> Result<String>;

    /// Model identifier, for status reporting
    fn model_name(&self) -> String;
}

/// Anthropic Messages API client
#[derive(Debug, Clone)]
pub struct AnthropicClient {
    http: reqwest::Client,
    model: Model,
    api_key_env: String,
    endpoint: String,
    timeout: Duration,
}

impl AnthropicClient {
    /// Create a client with a fixed per-request timeout
    pub fn new(model: Model, api_key_env: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SluiceError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            model,
            api_key_env: api_key_env.into(),
            endpoint: ANTHROPIC_API_URL.to_string(),
            timeout,
        })
    }

    pub fn from_config(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .parse::<Model>()
            .map_err(SluiceError::Config)?;
        Self::new(
            model,
            config.api_key_env.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    /// Point the client at a different messages endpoint
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    fn map_send_error(&self, e: reqwest::Error) -> SluiceError {
        if e.is_timeout() {
            SluiceError::Generation(format!(
                "Generation call timed out after {}s",
                self.timeout.as_secs()
            ))
        } else {
            SluiceError::Generation(format!("Failed to send request: {}", e))
        }
    }
}

#[async_trait]
impl GenerationClient for AnthropicClient {
    async fn generate(
        &self,
        system_prompt: &str,
        conversation: &Conversation,
        max_tokens: usize,
    ) -> Result<String> {
        if conversation.is_empty() {
            return Err(SluiceError::Validation(
                "Generation requires at least one message".to_string(),
            ));
        }

        let circuit_breaker = get_circuit_breaker();
        if !circuit_breaker.can_execute() {
            return Err(SluiceError::Generation(format!(
                "Circuit breaker is OPEN after repeated generation failures. Retry in {} seconds.",
                circuit_breaker.secs_until_retry()
            )));
        }

        let api_key = auth::get_api_key(&self.api_key_env)?;

        let request = AnthropicRequest {
            model: self.model.api_name().to_string(),
            max_tokens,
            system: (!system_prompt.is_empty()).then(|| system_prompt.to_string()),
            messages: conversation.messages().to_vec(),
        };

        tracing::debug!(
            "Sending generation request ({} messages, max_tokens {}) to {}",
            request.messages.len(),
            max_tokens,
            self.model
        );

        let response = match self
            .http
            .post(&self.endpoint)
            .header("x-api-key", &api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                circuit_breaker.record_failure();
                return Err(self.map_send_error(e));
            }
        };

        let status = response.status();

        if status.as_u16() == 429 {
            circuit_breaker.record_failure();
            tracing::warn!("Generation service rate limited the request");
            return Err(SluiceError::Generation(
                "Rate limited by generation service".to_string(),
            ));
        }

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown".to_string());
            circuit_breaker.record_failure();
            tracing::error!(
                "Generation service error {} (breaker failures: {})",
                status,
                circuit_breaker.failure_count()
            );
            return Err(SluiceError::Generation(format!(
                "Generation service error {}: {}",
                status, error_text
            )));
        }

        // Body is read in full or discarded; a timeout here drops the partial text
        let parsed: AnthropicResponse = match response.json().await {
            Ok(parsed) => parsed,
            Err(e) => {
                circuit_breaker.record_failure();
                return Err(if e.is_timeout() {
                    self.map_send_error(e)
                } else {
                    SluiceError::Generation(format!("Failed to parse response: {}", e))
                });
            }
        };

        let output = parsed
            .first_text()
            .ok_or_else(|| SluiceError::Generation("No text content in response".to_string()))?
            .to_string();

        circuit_breaker.record_success();

        match parsed.usage {
            Some(ref usage) => tracing::info!(
                "Generation complete ({} chars, {} input tokens, {} output tokens)",
                output.len(),
                usage.input_tokens,
                usage.output_tokens
            ),
            None => tracing::info!("Generation complete ({} chars)", output.len()),
        }

        Ok(output)
    }

    fn model_name(&self) -> String {
        self.model.api_name().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_parses_model() {
        let config = GenerationConfig {
            model: "haiku".to_string(),
            ..GenerationConfig::default()
        };
        let client = AnthropicClient::from_config(&config).unwrap();
        assert_eq!(client.model(), &Model::Haiku);
        assert_eq!(client.model_name(), "claude-3-5-haiku-20241022");
    }

    #[test]
    fn test_from_config_rejects_unknown_model() {
        let config = GenerationConfig {
            model: "gpt-4".to_string(),
            ..GenerationConfig::default()
        };
        let err = AnthropicClient::from_config(&config).unwrap_err();
        assert_eq!(err.reason(), "config_error");
    }

    #[tokio::test]
    async fn test_empty_conversation_is_rejected_before_network() {
        let client =
            AnthropicClient::new(Model::Sonnet, "SLUICE_UNUSED_KEY", Duration::from_secs(1))
                .unwrap();
        let err = client
            .generate("system", &Conversation::new(), 16)
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "validation_error");
    }

    #[tokio::test]
    async fn test_unreachable_service_is_generation_failure() {
        std::env::set_var("SLUICE_CLIENT_TEST_KEY", "test-key");
        // Port 9 (discard) on localhost is expected to refuse connections
        let client = AnthropicClient::new(
            Model::Sonnet,
            "SLUICE_CLIENT_TEST_KEY",
            Duration::from_secs(2),
        )
        .unwrap()
        .with_endpoint("http://127.0.0.1:9/v1/messages");

        let err = client
            .generate("system", &Conversation::single("hello"), 16)
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "generation_failure");
    }
}
